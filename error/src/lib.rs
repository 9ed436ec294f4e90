/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains the error type and error codes for the verified-boot
    kernel load library.

--*/
#![cfg_attr(not(feature = "std"), no_std)]
use core::convert::From;
use core::num::NonZeroU32;

/// Veriboot Error Type
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct VbootError(pub NonZeroU32);

impl VbootError {
    const fn new_const(val: u32) -> Self {
        match NonZeroU32::new(val) {
            Some(val) => Self(val),
            None => panic!("VbootError cannot be 0"),
        }
    }

    /// Packed Key Errors
    pub const PACKED_KEY_ERR_TOO_SMALL: VbootError = VbootError::new_const(0x000a0001);
    pub const PACKED_KEY_ERR_ALGORITHM_INVALID: VbootError = VbootError::new_const(0x000a0002);
    pub const PACKED_KEY_ERR_MATERIAL_LAYOUT: VbootError = VbootError::new_const(0x000a0003);

    /// Keyblock Verifier Errors
    pub const KEYBLOCK_VERIFIER_ERR_TOO_SMALL: VbootError = VbootError::new_const(0x000b0001);
    pub const KEYBLOCK_VERIFIER_ERR_MAGIC_MISMATCH: VbootError = VbootError::new_const(0x000b0002);
    pub const KEYBLOCK_VERIFIER_ERR_SIZE_INVALID: VbootError = VbootError::new_const(0x000b0003);
    pub const KEYBLOCK_VERIFIER_ERR_SIGNATURE_LAYOUT: VbootError =
        VbootError::new_const(0x000b0004);
    pub const KEYBLOCK_VERIFIER_ERR_HASH_LAYOUT: VbootError = VbootError::new_const(0x000b0005);
    pub const KEYBLOCK_VERIFIER_ERR_DATA_KEY_LAYOUT: VbootError = VbootError::new_const(0x000b0006);
    pub const KEYBLOCK_VERIFIER_ERR_KERNEL_SUBKEY_UNPACK: VbootError =
        VbootError::new_const(0x000b0007);
    pub const KEYBLOCK_VERIFIER_ERR_SIGNATURE_DIGEST_FAILURE: VbootError =
        VbootError::new_const(0x000b0008);
    pub const KEYBLOCK_VERIFIER_ERR_SIGNATURE_VERIFY_FAILURE: VbootError =
        VbootError::new_const(0x000b0009);
    pub const KEYBLOCK_VERIFIER_ERR_SIGNATURE_INVALID: VbootError =
        VbootError::new_const(0x000b000a);
    pub const KEYBLOCK_VERIFIER_ERR_HASH_DIGEST_FAILURE: VbootError =
        VbootError::new_const(0x000b000b);
    pub const KEYBLOCK_VERIFIER_ERR_HASH_MISMATCH: VbootError = VbootError::new_const(0x000b000c);
    pub const KEYBLOCK_VERIFIER_ERR_DEV_FLAG_MISMATCH: VbootError =
        VbootError::new_const(0x000b000d);
    pub const KEYBLOCK_VERIFIER_ERR_REC_FLAG_MISMATCH: VbootError =
        VbootError::new_const(0x000b000e);
    pub const KEYBLOCK_VERIFIER_ERR_KEY_VERSION_ROLLBACK: VbootError =
        VbootError::new_const(0x000b000f);
    pub const KEYBLOCK_VERIFIER_ERR_KEY_VERSION_RANGE: VbootError =
        VbootError::new_const(0x000b0010);
    pub const KEYBLOCK_VERIFIER_ERR_DEV_KEY_HASH_DIGEST_FAILURE: VbootError =
        VbootError::new_const(0x000b0011);
    pub const KEYBLOCK_VERIFIER_ERR_DEV_KEY_HASH_MISSING: VbootError =
        VbootError::new_const(0x000b0012);
    pub const KEYBLOCK_VERIFIER_ERR_DEV_KEY_HASH_MISMATCH: VbootError =
        VbootError::new_const(0x000b0013);
    pub const KEYBLOCK_VERIFIER_ERR_DATA_KEY_UNPACK: VbootError =
        VbootError::new_const(0x000b0014);

    /// Preamble Verifier Errors
    pub const PREAMBLE_VERIFIER_ERR_TOO_SMALL: VbootError = VbootError::new_const(0x000c0001);
    pub const PREAMBLE_VERIFIER_ERR_SIZE_INVALID: VbootError = VbootError::new_const(0x000c0002);
    pub const PREAMBLE_VERIFIER_ERR_SIGNATURE_LAYOUT: VbootError =
        VbootError::new_const(0x000c0003);
    pub const PREAMBLE_VERIFIER_ERR_BODY_SIGNATURE_LAYOUT: VbootError =
        VbootError::new_const(0x000c0004);
    pub const PREAMBLE_VERIFIER_ERR_DIGEST_FAILURE: VbootError = VbootError::new_const(0x000c0005);
    pub const PREAMBLE_VERIFIER_ERR_SIGNATURE_VERIFY_FAILURE: VbootError =
        VbootError::new_const(0x000c0006);
    pub const PREAMBLE_VERIFIER_ERR_SIGNATURE_INVALID: VbootError =
        VbootError::new_const(0x000c0007);
    pub const PREAMBLE_VERIFIER_ERR_VERSION_RANGE: VbootError = VbootError::new_const(0x000c0008);
    pub const PREAMBLE_VERIFIER_ERR_VERSION_ROLLBACK: VbootError =
        VbootError::new_const(0x000c0009);

    /// Body Data Verifier Errors
    pub const DATA_VERIFIER_ERR_SIGNATURE_SIZE: VbootError = VbootError::new_const(0x000d0001);
    pub const DATA_VERIFIER_ERR_DIGEST_FAILURE: VbootError = VbootError::new_const(0x000d0002);
    pub const DATA_VERIFIER_ERR_VERIFY_FAILURE: VbootError = VbootError::new_const(0x000d0003);
    pub const DATA_VERIFIER_ERR_SIGNATURE_INVALID: VbootError = VbootError::new_const(0x000d0004);

    /// Partition Load Errors
    pub const LOAD_PARTITION_ERR_WORKBUF: VbootError = VbootError::new_const(0x000e0001);
    pub const LOAD_PARTITION_ERR_READ_VBLOCK: VbootError = VbootError::new_const(0x000e0002);
    pub const LOAD_PARTITION_ERR_BODY_OFFSET: VbootError = VbootError::new_const(0x000e0003);
    pub const LOAD_PARTITION_ERR_BODY_SIZE: VbootError = VbootError::new_const(0x000e0004);
    pub const LOAD_PARTITION_ERR_READ_BODY: VbootError = VbootError::new_const(0x000e0005);
    pub const LOAD_PARTITION_ERR_DATA_KEY: VbootError = VbootError::new_const(0x000e0006);
    pub const LOAD_PARTITION_ERR_VERIFY_BODY: VbootError = VbootError::new_const(0x000e0007);

    /// Kernel Scan Errors
    pub const KERNEL_SCAN_ERR_PARTITION_TABLE: VbootError = VbootError::new_const(0x000f0001);
    pub const KERNEL_SCAN_ERR_NO_KERNEL_FOUND: VbootError = VbootError::new_const(0x000f0002);
    pub const KERNEL_SCAN_ERR_INVALID_KERNEL_FOUND: VbootError = VbootError::new_const(0x000f0003);
    pub const KERNEL_SCAN_ERR_STREAM_OPEN: VbootError = VbootError::new_const(0x000f0004);
    pub const KERNEL_SCAN_ERR_STREAM_READ: VbootError = VbootError::new_const(0x000f0005);
    pub const KERNEL_SCAN_ERR_WRITE_BACK: VbootError = VbootError::new_const(0x000f0006);
    pub const KERNEL_SCAN_ERR_BODY_BUFFER: VbootError = VbootError::new_const(0x000f0007);
}

impl From<core::num::NonZeroU32> for crate::VbootError {
    fn from(val: core::num::NonZeroU32) -> Self {
        crate::VbootError(val)
    }
}

impl From<VbootError> for core::num::NonZeroU32 {
    fn from(val: VbootError) -> Self {
        val.0
    }
}

impl From<VbootError> for u32 {
    fn from(val: VbootError) -> Self {
        core::num::NonZeroU32::from(val).get()
    }
}

pub type VbootResult<T> = Result<T, VbootError>;
