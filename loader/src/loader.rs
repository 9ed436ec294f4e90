/*++

Licensed under the Apache-2.0 license.

File Name:

    loader.rs

Abstract:

    This file implements the kernel partition scan: each candidate the
    partition table yields is verified under the current boot-mode policy,
    the winner's body is loaded, and the secured-counter target is derived
    from the lowest signed version seen on disk.

--*/

use crate::*;
use veriboot_common::{cprintln, okref};
use veriboot_error::{VbootError, VbootResult};
use veriboot_image_types::ContextFlags;
use veriboot_image_verify::{
    verify_data, BootMode, KernelVerificationEnv, VblockVerificationInfo, VblockVerifier,
};

/// Bytes read from the start of each kernel partition before deciding
/// whether to stream the rest of the body.
pub const KBUF_SIZE: usize = 65536;

/// Sentinel meaning no signed candidate has updated the lowest-version
/// tracker yet.
const LOWEST_VERSION_NONE: u32 = 0xffff_ffff;

/// Parameters for a kernel load call.
#[derive(Debug, Clone, Copy)]
pub struct LoadKernelParams<'a> {
    /// Storage geometry.
    pub geometry: DiskGeometry,

    /// Caller boot flags.
    pub boot_flags: BootFlags,

    /// Packed subkey used to validate keyblocks: the kernel subkey from
    /// firmware verification, or the recovery root key.
    pub kernel_subkey: &'a [u8],
}

/// Outcome of a successful kernel load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedKernel {
    /// 1-based index of the chosen partition.
    pub partition_number: u32,

    /// Unique GUID of the chosen partition.
    pub partition_guid: Guid,

    /// Bootloader location from the preamble.
    pub bootloader_address: u64,

    /// Bootloader size from the preamble.
    pub bootloader_size: u32,

    /// Preamble flags.
    pub preamble_flags: u32,

    /// The chosen kernel verified under the official signature chain.
    pub kernel_signed: bool,

    /// Composite version for the platform to compare against the secured
    /// counter. When signed candidates were observed this is the lowest
    /// signed version on disk, so a stale partition cannot pin the
    /// counter forever; equality with the counter means no advance.
    pub kernel_version: u32,
}

/// Load and verify a kernel from the disk's kernel partitions.
///
/// Scans every candidate the partition table yields, verifying each under
/// the policy for the current boot mode, and loads the first fully
/// verified kernel. Later candidates still have their vblocks examined so
/// the secured-counter target can account for the lowest signed version
/// on disk. Partition-table updates are written back on every exit path.
pub fn load_kernel<Env: KernelVerificationEnv, D: KernelDisk>(
    env: &mut Env,
    disk: &mut D,
    params: &LoadKernelParams,
    kernel_buffer: Option<&mut [u8]>,
    workbuf: &mut WorkBuf,
) -> VbootResult<LoadedKernel> {
    let mut table = match disk.partition_table(&params.geometry, params.boot_flags) {
        Ok(table) => table,
        Err(_) => {
            cprintln!("[kload] unable to read partition table");
            return Err(VbootError::KERNEL_SCAN_ERR_NO_KERNEL_FOUND);
        }
    };

    let result = scan_kernel_entries(env, disk, &mut table, params, kernel_buffer, workbuf);

    // Write back and release the partition table state on every exit path.
    if table.write_back().is_err() {
        cprintln!("[kload] partition table write-back failed");
    }

    result
}

fn scan_kernel_entries<Env: KernelVerificationEnv, D: KernelDisk>(
    env: &mut Env,
    disk: &mut D,
    table: &mut D::Table,
    params: &LoadKernelParams,
    mut kernel_buffer: Option<&mut [u8]>,
    workbuf: &mut WorkBuf,
) -> VbootResult<LoadedKernel> {
    let flags = env.context_flags();
    let boot_mode = BootMode::from_context(flags);

    let mut found_partitions = 0u32;
    let mut lowest_version = LOWEST_VERSION_NONE;
    let mut last_composite = 0u32;
    let mut chosen: Option<LoadedKernel> = None;

    while let Some(entry) = table.next_kernel_entry() {
        cprintln!(
            "[kload] found kernel entry at {} size {}",
            entry.start_lba,
            entry.lba_count
        );
        found_partitions += 1;

        let mut stream = match disk.open_stream(entry.start_lba, entry.lba_count) {
            Ok(stream) => stream,
            Err(_) => {
                cprintln!("[kload] partition error getting stream");
                table.mark_current(EntryUpdate::Bad);
                continue;
            }
        };

        // Once a good kernel is chosen, later candidates only need their
        // vblock versions examined for the rollback counter.
        let vblock_only = chosen.is_some();

        let loaded = load_partition(
            env,
            disk,
            &mut stream,
            params.kernel_subkey,
            vblock_only,
            kernel_buffer.as_deref_mut(),
            workbuf,
        );
        let info = match okref(&loaded) {
            Ok(info) => info,
            Err(_) => {
                cprintln!("[kload] marking kernel entry invalid");
                table.mark_current(EntryUpdate::Bad);
                continue;
            }
        };

        last_composite = info.composite_version;

        // Track the lowest version across valid signed headers.
        if info.kernel_signed && lowest_version > info.composite_version {
            lowest_version = info.composite_version;
        }
        cprintln!("[kload] keyblock signed: {}", info.kernel_signed as u32);
        cprintln!("[kload] combined version: {}", info.composite_version);

        if vblock_only {
            continue;
        }

        // We found a partition we like. The table indexes entries from
        // zero; the external contract is 1-based.
        let kernel = LoadedKernel {
            partition_number: table.current_index() + 1,
            partition_guid: table.current_guid(),
            bootloader_address: info.preamble.bootloader_address,
            bootloader_size: info.preamble.bootloader_size,
            preamble_flags: info.preamble.flags,
            kernel_signed: info.kernel_signed,
            kernel_version: info.composite_version,
        };

        // Note the entry we are about to try, except when the boot may
        // legitimately not complete (early shutdown).
        if !flags.contains(ContextFlags::NOFAIL_BOOT) {
            table.mark_current(EntryUpdate::Try);
        }

        chosen = Some(kernel);

        // In recovery mode, or when about to boot a kernel that is not
        // officially signed, no rollback protection applies and the scan
        // can stop at the first valid candidate.
        if boot_mode == BootMode::Recovery || !info.kernel_signed {
            cprintln!("[kload] in recovery mode or self-signed kernel");
            break;
        }

        // If the good partition's version matches the secured counter,
        // the counter needs no update and the scan can stop. Otherwise
        // keep looking for a lower-versioned signed candidate.
        if info.composite_version == env.kernel_version_secdata() {
            cprintln!("[kload] version matches secured counter");
            break;
        }
    }

    match chosen {
        Some(mut kernel) => {
            cprintln!("[kload] good partition {}", kernel.partition_number);
            // Only publish a counter advance if a signed candidate was
            // observed at all; in developer mode we may not have looked.
            if lowest_version != LOWEST_VERSION_NONE
                && lowest_version > env.kernel_version_secdata()
            {
                kernel.kernel_version = lowest_version;
            } else {
                kernel.kernel_version = last_composite;
            }
            Ok(kernel)
        }
        None if found_partitions > 0 => Err(VbootError::KERNEL_SCAN_ERR_INVALID_KERNEL_FOUND),
        None => Err(VbootError::KERNEL_SCAN_ERR_NO_KERNEL_FOUND),
    }
}

/// Load and verify one partition from its stream.
///
/// Reads the fixed prefix, verifies the vblock and, unless `vblock_only`
/// is set, loads and verifies the kernel body.
fn load_partition<Env: KernelVerificationEnv, D: KernelDisk>(
    env: &mut Env,
    disk: &mut D,
    stream: &mut D::Stream,
    kernel_subkey: &[u8],
    vblock_only: bool,
    kernel_buffer: Option<&mut [u8]>,
    workbuf: &mut WorkBuf,
) -> VbootResult<VblockVerificationInfo> {
    let mut wb = workbuf.reborrow();

    let kbuf = wb
        .alloc(KBUF_SIZE)
        .ok_or(VbootError::LOAD_PARTITION_ERR_WORKBUF)?;

    let start_ts = env.mtime_ms();
    if stream.read(kbuf).is_err() {
        cprintln!("[kload] unable to read start of partition");
        return Err(VbootError::LOAD_PARTITION_ERR_READ_VBLOCK);
    }
    let mut read_ms = env.mtime_ms().wrapping_sub(start_ts);

    let info = VblockVerifier::new(env).verify(kbuf, kernel_subkey)?;

    if vblock_only {
        return Ok(info);
    }

    let keyblock_size = info.keyblock.keyblock_size as usize;
    let preamble = &info.preamble;

    // The body must start at or before what was already read into kbuf.
    // A larger offset would mean reading and discarding the gap between
    // the vblock and the body.
    let body_offset = keyblock_size as u64 + preamble.preamble_size as u64;
    if body_offset > KBUF_SIZE as u64 {
        cprintln!("[kload] kernel body offset beyond prefix read");
        return Err(VbootError::LOAD_PARTITION_ERR_BODY_OFFSET);
    }
    let body_offset = body_offset as usize;

    let body_size = preamble.body_signature.data_size as usize;
    let kernbuf: &mut [u8] = match kernel_buffer {
        Some(buf) => buf,
        // No caller buffer: use the load address and signed size the
        // preamble declares.
        None => disk
            .body_load_buffer(preamble.body_load_address, preamble.body_signature.data_size)
            .map_err(|_| VbootError::KERNEL_SCAN_ERR_BODY_BUFFER)?,
    };
    if body_size > kernbuf.len() {
        cprintln!("[kload] kernel body does not fit in memory");
        return Err(VbootError::LOAD_PARTITION_ERR_BODY_SIZE);
    }

    // Copy the body bytes already read, without over-copying a tiny
    // kernel, then stream the remainder.
    let body_copied = core::cmp::min(KBUF_SIZE - body_offset, body_size);
    kernbuf[..body_copied].copy_from_slice(&kbuf[body_offset..body_offset + body_copied]);

    let body_toread = body_size - body_copied;
    let start_ts = env.mtime_ms();
    if body_toread > 0 && stream.read(&mut kernbuf[body_copied..body_size]).is_err() {
        cprintln!("[kload] unable to read kernel body");
        return Err(VbootError::LOAD_PARTITION_ERR_READ_BODY);
    }
    read_ms = read_ms.wrapping_add(env.mtime_ms().wrapping_sub(start_ts));
    if read_ms == 0 {
        // Avoid division by zero in the speed calculation.
        read_ms = 1;
    }
    let read_bytes = (body_toread + KBUF_SIZE) as u64;
    cprintln!(
        "[kload] read {} KB in {} ms at {} KB/s",
        (read_bytes / 1024) as u32,
        read_ms,
        (read_bytes * 1000 / (read_ms as u64 * 1024)) as u32
    );

    // Get the key for body verification from the keyblock.
    let mut data_key = info
        .keyblock
        .unpack_data_key(kbuf)
        .map_err(|_| VbootError::LOAD_PARTITION_ERR_DATA_KEY)?;
    if env.context_flags().contains(ContextFlags::HWCRYPTO_ALLOWED) {
        data_key.allow_hwcrypto = true;
    }

    // Verify the kernel body.
    let preamble_region = &kbuf[keyblock_size..keyblock_size + preamble.preamble_size as usize];
    let body_sig = preamble
        .body_signature
        .signature_bytes(preamble_region)
        .ok_or(VbootError::LOAD_PARTITION_ERR_VERIFY_BODY)?;
    if verify_data(
        env,
        &data_key,
        &kernbuf[..body_size],
        &preamble.body_signature,
        body_sig,
    )
    .is_err()
    {
        cprintln!("[kload] kernel body verification failed");
        return Err(VbootError::LOAD_PARTITION_ERR_VERIFY_BODY);
    }

    cprintln!("[kload] partition is good");
    Ok(info)
}
