//! The `Assembly` table and its flag values.

mod raw;

pub use raw::AssemblyRaw;

#[allow(non_snake_case)]
/// Flags for `AssemblyFlags` (ECMA-335 II.23.1.2)
pub mod AssemblyFlags {
    /// The assembly holds the full (unhashed) public key
    pub const PUBLIC_KEY: u32 = 0x0001;
    /// The implementation of this assembly used at runtime is not expected to match the version seen at compile time
    pub const RETARGETABLE: u32 = 0x0100;
    /// Reserved (a conforming implementation of the CLI may ignore this setting on read)
    pub const DISABLE_JIT_COMPILE_OPTIMIZER: u32 = 0x4000;
    /// Reserved (a conforming implementation of the CLI may ignore this setting on read)
    pub const ENABLE_JIT_COMPILE_TRACKING: u32 = 0x8000;
}

#[allow(non_snake_case)]
/// Values for `AssemblyHashAlgorithm` (ECMA-335 II.23.1.1)
pub mod AssemblyHashAlgorithm {
    /// No hash algorithm specified
    pub const NONE: u32 = 0x0000;
    /// MD5 hash algorithm
    pub const MD5: u32 = 0x8003;
    /// SHA1 hash algorithm
    pub const SHA1: u32 = 0x8004;
}
