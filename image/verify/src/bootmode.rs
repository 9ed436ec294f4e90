/*++

Licensed under the Apache-2.0 license.

File Name:

    bootmode.rs

Abstract:

    File contains the boot-state digests extended into the platform
    measurement register.

--*/

use veriboot_image_types::{ContextFlags, SHA1_DIGEST_BYTE_SIZE};

/// Input digests for the boot-state measurement, calculated as
/// SHA1(developer || recovery || keyblock_mode) over one byte each.
/// keyblock_mode is 0 in recovery mode and 1 otherwise.
const BOOT_STATE_SHA1_DIGESTS: [[u8; SHA1_DIGEST_BYTE_SIZE]; 4] = [
    // SHA1(0x00|0x00|0x01)
    [
        0x25, 0x47, 0xcc, 0x73, 0x6e, 0x95, 0x1f, 0xa4, 0x91, 0x98, 0x53, 0xc4, 0x3a, 0xe8, 0x90,
        0x86, 0x1a, 0x3b, 0x32, 0x64,
    ],
    // SHA1(0x01|0x00|0x01)
    [
        0xc4, 0x2a, 0xc1, 0xc4, 0x6f, 0x1d, 0x4e, 0x21, 0x1c, 0x73, 0x5c, 0xc7, 0xdf, 0xad, 0x4f,
        0xf8, 0x39, 0x11, 0x10, 0xe9,
    ],
    // SHA1(0x00|0x01|0x00)
    [
        0x62, 0x57, 0x18, 0x91, 0x21, 0x5b, 0x4e, 0xfc, 0x1c, 0xea, 0xb7, 0x44, 0xce, 0x59, 0xdd,
        0x0b, 0x66, 0xea, 0x6f, 0x73,
    ],
    // SHA1(0x01|0x01|0x00)
    [
        0x47, 0xec, 0x8d, 0x98, 0x36, 0x64, 0x33, 0xdc, 0x00, 0x2e, 0x77, 0x21, 0xc9, 0xe3, 0x7d,
        0x50, 0x67, 0x54, 0x79, 0x37,
    ],
];

/// Digest recording the current boot state, to be extended into the
/// platform measurement register once the boot mode is settled.
pub fn boot_state_digest(flags: ContextFlags) -> &'static [u8; SHA1_DIGEST_BYTE_SIZE] {
    let recovery = flags.contains(ContextFlags::RECOVERY_MODE) as usize;
    let developer = flags.contains(ContextFlags::DEVELOPER_MODE) as usize;
    &BOOT_STATE_SHA1_DIGESTS[2 * recovery + developer]
}
