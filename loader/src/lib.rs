/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    Kernel partition scanning and loading library. Drives the vblock
    verifier over every kernel candidate the partition table yields and
    hands back the partition to boot.

--*/
#![cfg_attr(not(feature = "std"), no_std)]

mod loader;
mod workbuf;

use veriboot_error::VbootResult;

pub use loader::{load_kernel, LoadKernelParams, LoadedKernel, KBUF_SIZE};
pub use workbuf::WorkBuf;

/// Unique partition identifier.
pub type Guid = [u8; 16];

bitflags::bitflags! {
    /// Flags supplied by the caller of `load_kernel`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BootFlags : u32 {
        /// The partition table lives on a different device than the
        /// partitions it describes.
        const EXTERNAL_GPT = 0x1;
    }
}

/// Storage geometry handed through to the partition-table library.
#[derive(Debug, Clone, Copy)]
pub struct DiskGeometry {
    pub bytes_per_lba: u64,
    pub streaming_lba_count: u64,
    pub gpt_lba_count: u64,
}

/// A kernel candidate yielded by the partition table.
#[derive(Debug, Clone, Copy)]
pub struct KernelEntry {
    pub start_lba: u64,
    pub lba_count: u64,
}

/// Disposition recorded against the current kernel entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryUpdate {
    /// The entry failed verification; stop trying it.
    Bad,

    /// The entry is about to be booted; charge one boot attempt.
    Try,
}

/// Partition-table library interface.
///
/// The implementation owns the parsed table for the duration of a scan
/// and accumulates entry updates until `write_back`.
pub trait PartitionTable {
    /// Next kernel candidate, or `None` when the table is exhausted.
    fn next_kernel_entry(&mut self) -> Option<KernelEntry>;

    /// Record a disposition against the most recently yielded entry.
    fn mark_current(&mut self, update: EntryUpdate);

    /// 0-based index of the most recently yielded entry.
    fn current_index(&self) -> u32;

    /// Unique GUID of the most recently yielded entry.
    fn current_guid(&self) -> Guid;

    /// Flush accumulated entry updates back to storage and release the
    /// table state.
    fn write_back(&mut self) -> VbootResult<()>;
}

/// Byte stream over one partition's contents. Closed on drop.
pub trait PartitionStream {
    /// Read exactly `buf.len()` bytes. Fails when the partition has
    /// fewer bytes remaining.
    fn read(&mut self, buf: &mut [u8]) -> VbootResult<()>;
}

/// Storage-device interface consumed by the kernel loader.
pub trait KernelDisk {
    type Table: PartitionTable;
    type Stream: PartitionStream;

    /// Read and parse the partition table.
    fn partition_table(
        &mut self,
        geometry: &DiskGeometry,
        flags: BootFlags,
    ) -> VbootResult<Self::Table>;

    /// Open a stream over `lba_count` blocks starting at `start_lba`.
    fn open_stream(&mut self, start_lba: u64, lba_count: u64) -> VbootResult<Self::Stream>;

    /// Memory backing a kernel body at its declared load address. Used
    /// when the caller did not supply a kernel buffer.
    fn body_load_buffer(&mut self, load_address: u64, size: u32) -> VbootResult<&mut [u8]>;
}
