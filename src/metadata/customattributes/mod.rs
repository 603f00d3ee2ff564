//! Custom attributes and friend declarations.
//!
//! The only attribute whose value is interpreted is `InternalsVisibleToAttribute`; its single
//! string argument is exposed as a [`FriendDeclaration`] so that a key clause can be appended
//! when the module it belongs to gains a strong name.

mod parser;
mod types;

pub use types::{
    CustomAttribute, CustomAttributeValue, FriendDeclaration, FRIEND_ATTRIBUTE_NAME,
    FRIEND_ATTRIBUTE_NAMESPACE,
};
