/*++

Licensed under the Apache-2.0 license.

File Name:

    verifier.rs

Abstract:

    This file is the main implementation of the kernel vblock verifier.

--*/

use crate::*;
use veriboot_common::{cprintln, safe_memcmp, HexBytes};
use veriboot_error::{VbootError, VbootResult};
use veriboot_image_types::*;
use zerocopy::FromBytes;

/// Kernel Vblock Verifier
pub struct VblockVerifier<'a, Env: KernelVerificationEnv> {
    /// Verification Environment
    env: &'a mut Env,
}

impl<'a, Env: KernelVerificationEnv> VblockVerifier<'a, Env> {
    /// Create a new instance of `VblockVerifier`
    ///
    /// # Arguments
    ///
    /// * `env` - Environment
    pub fn new(env: &'a mut Env) -> Self {
        Self { env }
    }

    /// Check if a valid keyblock signature is required.
    ///
    /// Normal and recovery modes always require an officially signed
    /// kernel. In developer mode the device owner (via FWMP) or the user
    /// (via the non-volatile flag) may demand one; otherwise a valid
    /// keyblock hash is enough.
    pub fn require_signed(&self) -> bool {
        if BootMode::from_context(self.env.context_flags()) != BootMode::Developer {
            return true;
        }

        if self
            .env
            .fwmp_flags()
            .contains(FwmpFlags::DEV_ENABLE_OFFICIAL_ONLY)
        {
            return true;
        }

        if self.env.nv_dev_boot_signed_only() {
            return true;
        }

        false
    }

    /// Verify the vblock (keyblock and preamble) at the start of `kbuf`.
    ///
    /// # Arguments
    ///
    /// * `kbuf`          - Buffer containing the vblock at offset 0
    /// * `kernel_subkey` - Packed subkey from firmware verification, or
    ///                     the recovery root key
    ///
    /// # Returns
    ///
    /// * `VblockVerificationInfo` - Vblock verification information on success
    pub fn verify(
        &mut self,
        kbuf: &[u8],
        kernel_subkey: &[u8],
    ) -> VbootResult<VblockVerificationInfo> {
        let flags = self.env.context_flags();
        let boot_mode = BootMode::from_context(flags);
        let need_keyblock_valid = self.require_signed();

        // Assume signed until a recoverable check downgrades it.
        let mut keyblock_valid = true;

        // Unpack the kernel subkey.
        let mut subkey = UnpackedKey::unpack(kernel_subkey)
            .map_err(|_| VbootError::KEYBLOCK_VERIFIER_ERR_KERNEL_SUBKEY_UNPACK)?;
        if flags.contains(ContextFlags::HWCRYPTO_ALLOWED) {
            subkey.allow_hwcrypto = true;
        }

        let keyblock = Self::read_keyblock(kbuf)?;

        // Verify the keyblock signature. When self-signed kernels are
        // allowed, fall back to the keyblock hash; a hash failure is fatal
        // either way.
        if let Err(e) = self.verify_keyblock_signature(kbuf, &keyblock, &subkey) {
            cprintln!("[kverify] keyblock signature verification failed");
            keyblock_valid = false;

            if need_keyblock_valid {
                cprintln!("[kverify] self-signed kernels not enabled");
                return Err(e);
            }

            self.verify_keyblock_hash(kbuf, &keyblock)?;
        }

        // Check the keyblock flags against the boot flags.
        let kb_flags = KeyblockFlags::from_bits_truncate(keyblock.keyblock_flags);
        let dev_flag = if flags.contains(ContextFlags::DEVELOPER_MODE) {
            KeyblockFlags::DEVELOPER_1
        } else {
            KeyblockFlags::DEVELOPER_0
        };
        if !kb_flags.contains(dev_flag) {
            cprintln!("[kverify] keyblock developer flag mismatch");
            keyblock_valid = false;
            if need_keyblock_valid {
                return Err(VbootError::KEYBLOCK_VERIFIER_ERR_DEV_FLAG_MISMATCH);
            }
        }
        let rec_flag = if flags.contains(ContextFlags::RECOVERY_MODE) {
            KeyblockFlags::RECOVERY_1
        } else {
            KeyblockFlags::RECOVERY_0
        };
        if !kb_flags.contains(rec_flag) {
            cprintln!("[kverify] keyblock recovery flag mismatch");
            keyblock_valid = false;
            if need_keyblock_valid {
                return Err(VbootError::KEYBLOCK_VERIFIER_ERR_REC_FLAG_MISMATCH);
            }
        }

        // Check for rollback of the key version, except in recovery mode.
        let key_version = keyblock.data_key.key_version;
        if boot_mode != BootMode::Recovery {
            if key_rollback(key_version, self.env.kernel_version_secdata()) {
                cprintln!("[kverify] key version too old");
                keyblock_valid = false;
                if need_keyblock_valid {
                    return Err(VbootError::KEYBLOCK_VERIFIER_ERR_KEY_VERSION_ROLLBACK);
                }
            }
            if key_version > MAX_KEY_VERSION {
                // The secured counter stores the key version in 16 bits.
                cprintln!("[kverify] key version exceeds 16 bits");
                keyblock_valid = false;
                if need_keyblock_valid {
                    return Err(VbootError::KEYBLOCK_VERIFIER_ERR_KEY_VERSION_RANGE);
                }
            }
        }

        // In developer mode with a pinned key hash, check it.
        if boot_mode == BootMode::Developer
            && self.env.fwmp_flags().contains(FwmpFlags::DEV_USE_KEY_HASH)
        {
            self.verify_dev_key_hash(kbuf, &keyblock)?;
        }

        // At this point the keyblock is at least self-consistent and
        // carried either a valid signature or a valid hash.
        // `keyblock_valid` records whether we would have been willing to
        // boot it with developer mode off.

        // Get the data key for preamble verification from the keyblock.
        let data_key = keyblock
            .unpack_data_key(kbuf)
            .map_err(|_| VbootError::KEYBLOCK_VERIFIER_ERR_DATA_KEY_UNPACK)?;

        // Verify the preamble, which follows the keyblock.
        let preamble_buf = &kbuf[keyblock.keyblock_size as usize..];
        let preamble = Self::read_preamble(preamble_buf)?;
        self.verify_preamble_signature(preamble_buf, &preamble, &data_key)?;

        // The preamble version is the lower 16 bits of the composite
        // kernel version.
        if preamble.kernel_version > MAX_PREAMBLE_VERSION {
            return Err(VbootError::PREAMBLE_VERIFIER_ERR_VERSION_RANGE);
        }

        // Combine with the key version.
        let composite_version = compose_version(key_version, preamble.kernel_version);

        // If not in recovery mode, check for rollback of the kernel version.
        if need_keyblock_valid
            && boot_mode != BootMode::Recovery
            && composite_rollback(composite_version, self.env.kernel_version_secdata())
        {
            cprintln!("[kverify] kernel version too low");
            return Err(VbootError::PREAMBLE_VERIFIER_ERR_VERSION_ROLLBACK);
        }

        cprintln!("[kverify] kernel preamble is good");
        Ok(VblockVerificationInfo {
            kernel_signed: keyblock_valid,
            composite_version,
            keyblock,
            preamble,
        })
    }

    /// Parse and structurally validate the keyblock at the start of `kbuf`.
    fn read_keyblock(kbuf: &[u8]) -> VbootResult<KeyblockHeader> {
        let keyblock = KeyblockHeader::read_from_prefix(kbuf)
            .ok_or(VbootError::KEYBLOCK_VERIFIER_ERR_TOO_SMALL)?;

        if keyblock.magic != KEYBLOCK_MAGIC {
            return Err(VbootError::KEYBLOCK_VERIFIER_ERR_MAGIC_MISMATCH);
        }

        let size = keyblock.keyblock_size as u64;
        if size < KEYBLOCK_HEADER_BYTE_SIZE as u64 || size > kbuf.len() as u64 {
            return Err(VbootError::KEYBLOCK_VERIFIER_ERR_SIZE_INVALID);
        }

        if !signed_region_ok(&keyblock.signature, KEYBLOCK_HEADER_BYTE_SIZE, size) {
            return Err(VbootError::KEYBLOCK_VERIFIER_ERR_SIGNATURE_LAYOUT);
        }
        if !signed_region_ok(&keyblock.hash, KEYBLOCK_HEADER_BYTE_SIZE, size) {
            return Err(VbootError::KEYBLOCK_VERIFIER_ERR_HASH_LAYOUT);
        }

        // The data key must sit inside both signed regions so whichever
        // verification path runs covers it.
        let key_start =
            KeyblockHeader::data_key_range().start as u64 + keyblock.data_key.key_offset as u64;
        let key_end = key_start + keyblock.data_key.key_size as u64;
        if key_end > keyblock.signature.data_size as u64
            || key_end > keyblock.hash.data_size as u64
        {
            return Err(VbootError::KEYBLOCK_VERIFIER_ERR_DATA_KEY_LAYOUT);
        }

        Ok(keyblock)
    }

    /// Verify the keyblock signature under the kernel subkey.
    fn verify_keyblock_signature(
        &mut self,
        kbuf: &[u8],
        keyblock: &KeyblockHeader,
        subkey: &UnpackedKey,
    ) -> VbootResult<()> {
        let sig = keyblock
            .signature
            .signature_bytes(kbuf)
            .ok_or(VbootError::KEYBLOCK_VERIFIER_ERR_SIGNATURE_LAYOUT)?;
        if sig.len() != subkey.algorithm.signature_byte_size() {
            return Err(VbootError::KEYBLOCK_VERIFIER_ERR_SIGNATURE_LAYOUT);
        }

        let digest = self
            .env
            .sha256_digest(&kbuf[..keyblock.signature.data_size as usize])
            .map_err(|_| VbootError::KEYBLOCK_VERIFIER_ERR_SIGNATURE_DIGEST_FAILURE)?;

        let ok = self
            .env
            .rsa_verify(subkey, &digest, sig)
            .map_err(|_| VbootError::KEYBLOCK_VERIFIER_ERR_SIGNATURE_VERIFY_FAILURE)?;

        if !ok {
            return Err(VbootError::KEYBLOCK_VERIFIER_ERR_SIGNATURE_INVALID);
        }

        Ok(())
    }

    /// Verify the keyblock hash. Only useful when self-signed kernels are
    /// permitted.
    fn verify_keyblock_hash(&mut self, kbuf: &[u8], keyblock: &KeyblockHeader) -> VbootResult<()> {
        let stored = keyblock
            .hash
            .signature_bytes(kbuf)
            .ok_or(VbootError::KEYBLOCK_VERIFIER_ERR_HASH_LAYOUT)?;
        if stored.len() != SHA256_DIGEST_BYTE_SIZE {
            return Err(VbootError::KEYBLOCK_VERIFIER_ERR_HASH_LAYOUT);
        }

        let digest = self
            .env
            .sha256_digest(&kbuf[..keyblock.hash.data_size as usize])
            .map_err(|_| VbootError::KEYBLOCK_VERIFIER_ERR_HASH_DIGEST_FAILURE)?;

        if !safe_memcmp(&digest, stored) {
            cprintln!("[kverify] keyblock hash verification failed");
            return Err(VbootError::KEYBLOCK_VERIFIER_ERR_HASH_MISMATCH);
        }

        Ok(())
    }

    /// Compare the data-key digest against the hash pinned in the FWMP
    /// store. A mismatch is fatal for this candidate no matter how the
    /// keyblock verified.
    fn verify_dev_key_hash(&mut self, kbuf: &[u8], keyblock: &KeyblockHeader) -> VbootResult<()> {
        cprintln!("[kverify] checking developer key hash");

        let material = keyblock
            .data_key_material(kbuf)
            .map_err(|_| VbootError::KEYBLOCK_VERIFIER_ERR_DATA_KEY_UNPACK)?;

        let digest = self
            .env
            .sha256_digest(material)
            .map_err(|_| VbootError::KEYBLOCK_VERIFIER_ERR_DEV_KEY_HASH_DIGEST_FAILURE)?;

        let Some(expected) = self.env.fwmp_dev_key_hash() else {
            cprintln!("[kverify] developer key hash unavailable");
            return Err(VbootError::KEYBLOCK_VERIFIER_ERR_DEV_KEY_HASH_MISSING);
        };

        if !safe_memcmp(&digest, expected) {
            cprintln!("[kverify] wrong developer key hash");
            cprintln!("[kverify] want: {}", HexBytes(expected));
            cprintln!("[kverify] got:  {}", HexBytes(&digest));
            return Err(VbootError::KEYBLOCK_VERIFIER_ERR_DEV_KEY_HASH_MISMATCH);
        }

        Ok(())
    }

    /// Parse and structurally validate the preamble at the start of `buf`,
    /// the region immediately after the keyblock.
    fn read_preamble(buf: &[u8]) -> VbootResult<KernelPreamble> {
        let preamble = KernelPreamble::read_from_prefix(buf)
            .ok_or(VbootError::PREAMBLE_VERIFIER_ERR_TOO_SMALL)?;

        let size = preamble.preamble_size as u64;
        if size < PREAMBLE_HEADER_BYTE_SIZE as u64 || size > buf.len() as u64 {
            return Err(VbootError::PREAMBLE_VERIFIER_ERR_SIZE_INVALID);
        }

        if !signed_region_ok(&preamble.preamble_signature, PREAMBLE_HEADER_BYTE_SIZE, size) {
            return Err(VbootError::PREAMBLE_VERIFIER_ERR_SIGNATURE_LAYOUT);
        }

        // The body signature's bytes land inside the preamble after the
        // header; its data_size is the body length and is bounded by the
        // body loader.
        let body_sig_start = preamble.body_signature.sig_offset as u64;
        let body_sig_end = body_sig_start + preamble.body_signature.sig_size as u64;
        if body_sig_start < PREAMBLE_HEADER_BYTE_SIZE as u64 || body_sig_end > size {
            return Err(VbootError::PREAMBLE_VERIFIER_ERR_BODY_SIGNATURE_LAYOUT);
        }

        Ok(preamble)
    }

    /// Verify the preamble signature under the keyblock's data key.
    fn verify_preamble_signature(
        &mut self,
        buf: &[u8],
        preamble: &KernelPreamble,
        data_key: &UnpackedKey,
    ) -> VbootResult<()> {
        let sig = preamble
            .preamble_signature
            .signature_bytes(buf)
            .ok_or(VbootError::PREAMBLE_VERIFIER_ERR_SIGNATURE_LAYOUT)?;
        if sig.len() != data_key.algorithm.signature_byte_size() {
            return Err(VbootError::PREAMBLE_VERIFIER_ERR_SIGNATURE_LAYOUT);
        }

        let digest = self
            .env
            .sha256_digest(&buf[..preamble.preamble_signature.data_size as usize])
            .map_err(|_| VbootError::PREAMBLE_VERIFIER_ERR_DIGEST_FAILURE)?;

        let ok = self
            .env
            .rsa_verify(data_key, &digest, sig)
            .map_err(|_| VbootError::PREAMBLE_VERIFIER_ERR_SIGNATURE_VERIFY_FAILURE)?;

        if !ok {
            cprintln!("[kverify] preamble verification failed");
            return Err(VbootError::PREAMBLE_VERIFIER_ERR_SIGNATURE_INVALID);
        }

        Ok(())
    }
}

/// A signed-region descriptor is well formed when it covers at least the
/// fixed header, stays inside the structure, and keeps the signature bytes
/// themselves outside the covered region.
fn signed_region_ok(info: &SignatureInfo, min_data_size: usize, total_size: u64) -> bool {
    let data_size = info.data_size as u64;
    let sig_start = info.sig_offset as u64;
    let sig_end = sig_start + info.sig_size as u64;

    data_size >= min_data_size as u64
        && data_size <= total_size
        && sig_start >= data_size
        && sig_end <= total_size
}

/// Verify a data region against a signature descriptor and key.
///
/// `data` must be exactly the `data_size` bytes the signature covers and
/// `sig` the raw signature bytes.
pub fn verify_data<Env: KernelVerificationEnv>(
    env: &mut Env,
    key: &UnpackedKey,
    data: &[u8],
    sig_info: &SignatureInfo,
    sig: &[u8],
) -> VbootResult<()> {
    if sig.len() != key.algorithm.signature_byte_size()
        || data.len() != sig_info.data_size as usize
    {
        return Err(VbootError::DATA_VERIFIER_ERR_SIGNATURE_SIZE);
    }

    let digest = env
        .sha256_digest(data)
        .map_err(|_| VbootError::DATA_VERIFIER_ERR_DIGEST_FAILURE)?;

    let ok = env
        .rsa_verify(key, &digest, sig)
        .map_err(|_| VbootError::DATA_VERIFIER_ERR_VERIFY_FAILURE)?;

    if !ok {
        return Err(VbootError::DATA_VERIFIER_ERR_SIGNATURE_INVALID);
    }

    Ok(())
}
