/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    Kernel vblock verification library.

--*/
#![cfg_attr(not(feature = "std"), no_std)]

mod bootmode;
mod verifier;

use veriboot_error::VbootResult;
use veriboot_image_types::*;

pub use bootmode::boot_state_digest;
pub use verifier::{verify_data, VblockVerifier};

/// Verified vblock information
#[derive(Debug)]
pub struct VblockVerificationInfo {
    /// The keyblock carried a signature valid under the kernel subkey,
    /// with flags and key version consistent with the current boot mode.
    /// A kernel that verified through the hash path, or whose checks were
    /// downgraded because self-signed kernels are allowed, reports `false`.
    pub kernel_signed: bool,

    /// Composite rollback version: data-key version in the upper 16 bits,
    /// preamble kernel version in the lower 16.
    pub composite_version: u32,

    /// Keyblock header.
    pub keyblock: KeyblockHeader,

    /// Kernel preamble.
    pub preamble: KernelPreamble,
}

/// Kernel Verification Environment
pub trait KernelVerificationEnv {
    /// Calculate a SHA-256 digest.
    fn sha256_digest(&mut self, data: &[u8]) -> VbootResult<Sha256Digest>;

    /// Verify `sig` over `digest` with the RSA key `key`.
    fn rsa_verify(
        &mut self,
        key: &UnpackedKey,
        digest: &Sha256Digest,
        sig: &[u8],
    ) -> VbootResult<bool>;

    /// Current boot-context flags.
    fn context_flags(&self) -> ContextFlags;

    /// Secured monotonic kernel version counter.
    fn kernel_version_secdata(&self) -> u32;

    /// Non-volatile "developer boots only signed kernels" flag.
    fn nv_dev_boot_signed_only(&self) -> bool;

    /// Firmware management parameter flags.
    fn fwmp_flags(&self) -> FwmpFlags;

    /// Developer data-key digest pinned in the FWMP store.
    fn fwmp_dev_key_hash(&self) -> Option<&Sha256Digest>;

    /// Monotonic millisecond counter. Telemetry only.
    fn mtime_ms(&mut self) -> u32;
}

/// Boot mode classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    /// Normal boot: kernel must be verified.
    Normal,

    /// Recovery boot, regardless of developer mode state.
    Recovery,

    /// Developer boot: self-signed kernel okay.
    Developer,
}

impl BootMode {
    /// Classify the current boot. Recovery dominates developer dominates
    /// normal.
    pub fn from_context(flags: ContextFlags) -> BootMode {
        if flags.contains(ContextFlags::RECOVERY_MODE) {
            return BootMode::Recovery;
        }

        if flags.contains(ContextFlags::DEVELOPER_MODE) {
            return BootMode::Developer;
        }

        BootMode::Normal
    }
}

/// True if a data-key version regressed below the key half of the secured
/// counter.
pub fn key_rollback(key_version: u32, secured: u32) -> bool {
    key_version < key_version_of(secured)
}

/// True if a composite version regressed below the secured counter.
pub fn composite_rollback(composite: u32, secured: u32) -> bool {
    composite < secured
}
