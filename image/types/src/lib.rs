/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    File contains data structures for the signed kernel partition image
    (keyblock and preamble) and the flag sets carried through a kernel
    load call.

--*/

#![cfg_attr(not(feature = "std"), no_std)]

use core::mem::size_of;
use core::ops::Range;

use memoffset::span_of;
use veriboot_error::{VbootError, VbootResult};
use zerocopy::{AsBytes, FromBytes};
use zeroize::Zeroize;

pub const KEYBLOCK_MAGIC: [u8; 8] = *b"KEYBLOCK";
pub const SHA256_DIGEST_BYTE_SIZE: usize = 32;
pub const SHA1_DIGEST_BYTE_SIZE: usize = 20;

/// Key and kernel versions are stored as 16-bit halves of the secured
/// counter; anything larger cannot be represented there.
pub const MAX_KEY_VERSION: u32 = 0xffff;
pub const MAX_PREAMBLE_VERSION: u32 = 0xffff;

pub const KEYBLOCK_HEADER_BYTE_SIZE: usize = size_of::<KeyblockHeader>();
pub const PREAMBLE_HEADER_BYTE_SIZE: usize = size_of::<KernelPreamble>();

pub type Sha256Digest = [u8; SHA256_DIGEST_BYTE_SIZE];

bitflags::bitflags! {
    /// Boot modes a keyblock authorizes. The developer/recovery bit
    /// matching the current context flag value must be set for the
    /// keyblock to be usable.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct KeyblockFlags : u32 {
        const DEVELOPER_0 = 0x1;
        const DEVELOPER_1 = 0x2;
        const RECOVERY_0 = 0x4;
        const RECOVERY_1 = 0x8;
    }
}

bitflags::bitflags! {
    /// Boot-context flags carried through a kernel load call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ContextFlags : u32 {
        const RECOVERY_MODE = 0x1;
        const DEVELOPER_MODE = 0x2;
        const HWCRYPTO_ALLOWED = 0x4;
        const NOFAIL_BOOT = 0x8;
    }
}

bitflags::bitflags! {
    /// Firmware management parameter flags set by the device owner.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FwmpFlags : u32 {
        const DEV_DISABLE_BOOT = 0x1;
        const DEV_DISABLE_RECOVERY = 0x2;
        const DEV_ENABLE_EXTERNAL = 0x4;
        const DEV_ENABLE_ALTFW = 0x8;
        const DEV_ENABLE_OFFICIAL_ONLY = 0x10;
        const DEV_USE_KEY_HASH = 0x20;
    }
}

/// Signature algorithm identifier carried in a packed key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa2048Sha256 = 0,
    Rsa4096Sha256 = 1,
}

impl KeyAlgorithm {
    /// Size of a signature produced with this algorithm.
    pub fn signature_byte_size(&self) -> usize {
        match self {
            KeyAlgorithm::Rsa2048Sha256 => 256,
            KeyAlgorithm::Rsa4096Sha256 => 512,
        }
    }

    /// Size of the message digest this algorithm signs.
    pub fn digest_byte_size(&self) -> usize {
        SHA256_DIGEST_BYTE_SIZE
    }
}

impl TryFrom<u32> for KeyAlgorithm {
    type Error = VbootError;

    fn try_from(value: u32) -> VbootResult<Self> {
        match value {
            0 => Ok(KeyAlgorithm::Rsa2048Sha256),
            1 => Ok(KeyAlgorithm::Rsa4096Sha256),
            _ => Err(VbootError::PACKED_KEY_ERR_ALGORITHM_INVALID),
        }
    }
}

/// Descriptor for a signature or digest stored alongside the data it
/// covers. `sig_offset` is relative to the start of the structure that
/// carries the descriptor. `data_size` is the number of bytes covered by
/// the signature; for a body signature it is the length of the kernel
/// body rather than a span of the preamble.
#[repr(C)]
#[derive(AsBytes, FromBytes, Default, Debug, Copy, Clone, Eq, PartialEq, Zeroize)]
pub struct SignatureInfo {
    pub sig_offset: u32,
    pub sig_size: u32,
    pub data_size: u32,
}

impl SignatureInfo {
    /// Signature bytes inside `container`, or `None` if the descriptor
    /// does not fit.
    pub fn signature_bytes<'a>(&self, container: &'a [u8]) -> Option<&'a [u8]> {
        let start = self.sig_offset as usize;
        let end = start.checked_add(self.sig_size as usize)?;
        container.get(start..end)
    }
}

/// Fixed header of a packed public key. Key material of `key_size` bytes
/// lives at `key_offset` from the start of this header.
#[repr(C)]
#[derive(AsBytes, FromBytes, Default, Debug, Copy, Clone, Eq, PartialEq, Zeroize)]
pub struct PackedKeyHeader {
    pub algorithm: u32,
    pub key_version: u32,
    pub key_size: u32,
    pub key_offset: u32,
}

/// A packed key resolved against the buffer holding it, ready for the
/// signature primitives.
#[derive(Debug)]
pub struct UnpackedKey<'a> {
    pub algorithm: KeyAlgorithm,
    pub key_version: u32,
    pub material: &'a [u8],

    /// Route signature operations with this key to the hardware crypto
    /// engine. Affects the primitive used, not the result.
    pub allow_hwcrypto: bool,
}

impl<'a> UnpackedKey<'a> {
    /// Resolve a packed key stored at the start of `buf`.
    pub fn unpack(buf: &'a [u8]) -> VbootResult<UnpackedKey<'a>> {
        let header = PackedKeyHeader::read_from_prefix(buf)
            .ok_or(VbootError::PACKED_KEY_ERR_TOO_SMALL)?;
        Self::from_header(&header, buf)
    }

    /// Resolve a packed key whose header was read from offset 0 of `buf`.
    pub fn from_header(header: &PackedKeyHeader, buf: &'a [u8]) -> VbootResult<UnpackedKey<'a>> {
        let algorithm = KeyAlgorithm::try_from(header.algorithm)?;
        let start = header.key_offset as u64;
        let end = start + header.key_size as u64;
        if end > buf.len() as u64 {
            return Err(VbootError::PACKED_KEY_ERR_MATERIAL_LAYOUT);
        }
        Ok(UnpackedKey {
            algorithm,
            key_version: header.key_version,
            material: &buf[start as usize..end as usize],
            allow_hwcrypto: false,
        })
    }
}

/// Keyblock header. The signed envelope binding a kernel data key to the
/// subkey handed down from firmware verification.
///
/// Within the keyblock the header comes first, followed by the data-key
/// material and then the signature and hash bytes. `signature` covers
/// bytes `[0, signature.data_size)` of the keyblock; `hash` is a SHA-256
/// digest over `[0, hash.data_size)` used when self-signed kernels are
/// permitted. Both signed regions must contain the data-key material.
#[repr(C)]
#[derive(AsBytes, FromBytes, Default, Debug, Copy, Clone, Eq, PartialEq, Zeroize)]
pub struct KeyblockHeader {
    pub magic: [u8; 8],
    pub keyblock_size: u32,
    pub keyblock_flags: u32,
    pub signature: SignatureInfo,
    pub hash: SignatureInfo,
    pub data_key: PackedKeyHeader,
}

impl KeyblockHeader {
    /// Range of the embedded data-key header within the keyblock.
    pub fn data_key_range() -> Range<u32> {
        let span = span_of!(KeyblockHeader, data_key);
        span.start as u32..span.end as u32
    }

    /// Key material of the embedded data key, resolved against the full
    /// keyblock bytes.
    pub fn data_key_material<'a>(&self, keyblock: &'a [u8]) -> VbootResult<&'a [u8]> {
        let start = Self::data_key_range().start as u64 + self.data_key.key_offset as u64;
        let end = start + self.data_key.key_size as u64;
        if end > keyblock.len() as u64 {
            return Err(VbootError::PACKED_KEY_ERR_MATERIAL_LAYOUT);
        }
        Ok(&keyblock[start as usize..end as usize])
    }

    /// Unpack the embedded data key for preamble and body verification.
    pub fn unpack_data_key<'a>(&self, keyblock: &'a [u8]) -> VbootResult<UnpackedKey<'a>> {
        let algorithm = KeyAlgorithm::try_from(self.data_key.algorithm)?;
        Ok(UnpackedKey {
            algorithm,
            key_version: self.data_key.key_version,
            material: self.data_key_material(keyblock)?,
            allow_hwcrypto: false,
        })
    }
}

/// Kernel preamble. Follows the keyblock and is signed by the keyblock's
/// data key.
///
/// `preamble_signature` covers bytes `[0, data_size)` of the preamble.
/// `body_signature` covers the kernel body; its signature bytes live
/// inside the preamble like the preamble signature's do.
#[repr(C)]
#[derive(AsBytes, FromBytes, Default, Debug, Copy, Clone, Eq, PartialEq, Zeroize)]
pub struct KernelPreamble {
    pub preamble_size: u32,
    pub kernel_version: u32,
    pub body_load_address: u64,
    pub bootloader_address: u64,
    pub bootloader_size: u32,
    pub flags: u32,
    pub preamble_signature: SignatureInfo,
    pub body_signature: SignatureInfo,
}

/// Compose the 32-bit rollback version from the keyblock's data key
/// version (upper 16 bits) and the preamble's kernel version (lower 16).
pub fn compose_version(key_version: u32, kernel_version: u32) -> u32 {
    key_version << 16 | kernel_version
}

/// Data-key half of a composite version or secured counter value.
pub fn key_version_of(composite: u32) -> u32 {
    composite >> 16
}
