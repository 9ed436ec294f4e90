// Licensed under the Apache-2.0 license

//! End-to-end kernel load scenarios over fake disk, partition-table and
//! crypto collaborators.

use std::cell::RefCell;
use std::rc::Rc;

use sha2::{Digest, Sha256};
use zerocopy::AsBytes;

use veriboot_error::{VbootError, VbootResult};
use veriboot_image_types::*;
use veriboot_image_verify::KernelVerificationEnv;
use veriboot_kernel_loader::{
    load_kernel, BootFlags, DiskGeometry, EntryUpdate, Guid, KernelDisk, KernelEntry,
    LoadKernelParams, LoadedKernel, PartitionStream, PartitionTable, WorkBuf, KBUF_SIZE,
};

const DATA_KEY_MATERIAL: &[u8] = b"test data key material";
const SUBKEY_MATERIAL: &[u8] = b"test kernel subkey material";
const RSA2048_SIG_SIZE: usize = 256;

const GEOMETRY: DiskGeometry = DiskGeometry {
    bytes_per_lba: 512,
    streaming_lba_count: 1 << 20,
    gpt_lba_count: 1 << 20,
};

fn sha256(data: &[u8]) -> Sha256Digest {
    Sha256::digest(data).into()
}

/// Deterministic stand-in for an RSA signature: every byte mixes the
/// digest with the key material, so a signature made with one key never
/// verifies under another.
fn fake_signature(key_material: &[u8], digest: &Sha256Digest, sig_size: usize) -> Vec<u8> {
    (0..sig_size)
        .map(|i| {
            let m = if key_material.is_empty() {
                0
            } else {
                key_material[i % key_material.len()]
            };
            digest[i % digest.len()] ^ m
        })
        .collect()
}

fn build_packed_key(material: &[u8]) -> Vec<u8> {
    let header = PackedKeyHeader {
        algorithm: KeyAlgorithm::Rsa2048Sha256 as u32,
        key_version: 1,
        key_size: material.len() as u32,
        key_offset: core::mem::size_of::<PackedKeyHeader>() as u32,
    };
    let mut buf = header.as_bytes().to_vec();
    buf.extend_from_slice(material);
    buf
}

#[derive(Clone)]
struct PartitionSpec {
    keyblock_flags: u32,
    key_version: u32,
    kernel_version: u32,
    good_signature: bool,
    body: Vec<u8>,
}

impl Default for PartitionSpec {
    fn default() -> Self {
        PartitionSpec {
            keyblock_flags: (KeyblockFlags::DEVELOPER_0 | KeyblockFlags::RECOVERY_0).bits(),
            key_version: 2,
            kernel_version: 2,
            good_signature: true,
            body: b"kernel body bytes".to_vec(),
        }
    }
}

fn build_keyblock(spec: &PartitionSpec) -> Vec<u8> {
    let data_end = KEYBLOCK_HEADER_BYTE_SIZE + DATA_KEY_MATERIAL.len();
    let header = KeyblockHeader {
        magic: KEYBLOCK_MAGIC,
        keyblock_size: (data_end + RSA2048_SIG_SIZE + SHA256_DIGEST_BYTE_SIZE) as u32,
        keyblock_flags: spec.keyblock_flags,
        signature: SignatureInfo {
            sig_offset: data_end as u32,
            sig_size: RSA2048_SIG_SIZE as u32,
            data_size: data_end as u32,
        },
        hash: SignatureInfo {
            sig_offset: (data_end + RSA2048_SIG_SIZE) as u32,
            sig_size: SHA256_DIGEST_BYTE_SIZE as u32,
            data_size: data_end as u32,
        },
        data_key: PackedKeyHeader {
            algorithm: KeyAlgorithm::Rsa2048Sha256 as u32,
            key_version: spec.key_version,
            key_size: DATA_KEY_MATERIAL.len() as u32,
            key_offset: core::mem::size_of::<PackedKeyHeader>() as u32,
        },
    };

    let mut buf = header.as_bytes().to_vec();
    buf.extend_from_slice(DATA_KEY_MATERIAL);

    let digest = sha256(&buf[..data_end]);
    let mut sig = fake_signature(SUBKEY_MATERIAL, &digest, RSA2048_SIG_SIZE);
    if !spec.good_signature {
        sig[0] ^= 0xff;
    }
    buf.extend_from_slice(&sig);
    buf.extend_from_slice(&digest);
    buf
}

fn build_preamble(spec: &PartitionSpec) -> Vec<u8> {
    // Layout: header, body signature bytes, preamble signature bytes.
    // The preamble signature covers the header and the body signature.
    let body_sig_offset = PREAMBLE_HEADER_BYTE_SIZE;
    let preamble_sig_offset = body_sig_offset + RSA2048_SIG_SIZE;
    let preamble_size = preamble_sig_offset + RSA2048_SIG_SIZE;

    let header = KernelPreamble {
        preamble_size: preamble_size as u32,
        kernel_version: spec.kernel_version,
        body_load_address: 0x0010_0000,
        bootloader_address: 0x0020_0000,
        bootloader_size: 512,
        flags: 0,
        preamble_signature: SignatureInfo {
            sig_offset: preamble_sig_offset as u32,
            sig_size: RSA2048_SIG_SIZE as u32,
            data_size: preamble_sig_offset as u32,
        },
        body_signature: SignatureInfo {
            sig_offset: body_sig_offset as u32,
            sig_size: RSA2048_SIG_SIZE as u32,
            data_size: spec.body.len() as u32,
        },
    };

    let mut buf = header.as_bytes().to_vec();
    let body_digest = sha256(&spec.body);
    buf.extend_from_slice(&fake_signature(
        DATA_KEY_MATERIAL,
        &body_digest,
        RSA2048_SIG_SIZE,
    ));
    let digest = sha256(&buf[..preamble_sig_offset]);
    buf.extend_from_slice(&fake_signature(DATA_KEY_MATERIAL, &digest, RSA2048_SIG_SIZE));
    buf
}

/// Partition image: vblock, then the body directly after it, padded to at
/// least the prefix-read size.
fn build_partition(spec: &PartitionSpec) -> Vec<u8> {
    let mut data = build_keyblock(spec);
    data.extend_from_slice(&build_preamble(spec));
    data.extend_from_slice(&spec.body);
    if data.len() < KBUF_SIZE {
        data.resize(KBUF_SIZE, 0);
    }
    data
}

struct TableState {
    entries: Vec<KernelEntry>,
    guids: Vec<Guid>,
    marks: Vec<Option<EntryUpdate>>,
    current: Option<usize>,
    next: usize,
    written_back: bool,
}

struct FakeTable {
    state: Rc<RefCell<TableState>>,
}

impl PartitionTable for FakeTable {
    fn next_kernel_entry(&mut self) -> Option<KernelEntry> {
        let mut state = self.state.borrow_mut();
        if state.next >= state.entries.len() {
            state.current = None;
            return None;
        }
        let entry = state.entries[state.next];
        state.current = Some(state.next);
        state.next += 1;
        Some(entry)
    }

    fn mark_current(&mut self, update: EntryUpdate) {
        let mut state = self.state.borrow_mut();
        if let Some(index) = state.current {
            state.marks[index] = Some(update);
        }
    }

    fn current_index(&self) -> u32 {
        self.state.borrow().current.unwrap() as u32
    }

    fn current_guid(&self) -> Guid {
        let state = self.state.borrow();
        state.guids[state.current.unwrap()]
    }

    fn write_back(&mut self) -> VbootResult<()> {
        self.state.borrow_mut().written_back = true;
        Ok(())
    }
}

struct FakeStream {
    data: Vec<u8>,
    pos: usize,
}

impl PartitionStream for FakeStream {
    fn read(&mut self, buf: &mut [u8]) -> VbootResult<()> {
        let end = self.pos + buf.len();
        if end > self.data.len() {
            return Err(VbootError::KERNEL_SCAN_ERR_STREAM_READ);
        }
        buf.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(())
    }
}

struct FakeDisk {
    partitions: Vec<Vec<u8>>,
    state: Rc<RefCell<TableState>>,
    table_read_fails: bool,
    stream_open_fails: Vec<bool>,
    opens: Vec<usize>,
    body_region: Vec<u8>,
    last_load_address: Option<u64>,
}

impl FakeDisk {
    fn new(partitions: Vec<Vec<u8>>) -> FakeDisk {
        let count = partitions.len();
        let entries = (0..count)
            .map(|i| KernelEntry {
                start_lba: i as u64,
                lba_count: (partitions[i].len() as u64).div_ceil(GEOMETRY.bytes_per_lba),
            })
            .collect();
        let guids = (0..count).map(|i| [i as u8 + 1; 16]).collect();
        let state = TableState {
            entries,
            guids,
            marks: vec![None; count],
            current: None,
            next: 0,
            written_back: false,
        };
        FakeDisk {
            partitions,
            state: Rc::new(RefCell::new(state)),
            table_read_fails: false,
            stream_open_fails: vec![false; count],
            opens: Vec::new(),
            body_region: Vec::new(),
            last_load_address: None,
        }
    }

    fn marks(&self) -> Vec<Option<EntryUpdate>> {
        self.state.borrow().marks.clone()
    }

    fn written_back(&self) -> bool {
        self.state.borrow().written_back
    }
}

impl KernelDisk for FakeDisk {
    type Table = FakeTable;
    type Stream = FakeStream;

    fn partition_table(
        &mut self,
        _geometry: &DiskGeometry,
        _flags: BootFlags,
    ) -> VbootResult<FakeTable> {
        if self.table_read_fails {
            return Err(VbootError::KERNEL_SCAN_ERR_PARTITION_TABLE);
        }
        Ok(FakeTable {
            state: self.state.clone(),
        })
    }

    fn open_stream(&mut self, start_lba: u64, _lba_count: u64) -> VbootResult<FakeStream> {
        let index = start_lba as usize;
        self.opens.push(index);
        if self.stream_open_fails[index] {
            return Err(VbootError::KERNEL_SCAN_ERR_STREAM_OPEN);
        }
        Ok(FakeStream {
            data: self.partitions[index].clone(),
            pos: 0,
        })
    }

    fn body_load_buffer(&mut self, load_address: u64, size: u32) -> VbootResult<&mut [u8]> {
        self.last_load_address = Some(load_address);
        if self.body_region.len() < size as usize {
            self.body_region.resize(size as usize, 0);
        }
        Ok(&mut self.body_region[..size as usize])
    }
}

struct TestEnv {
    flags: ContextFlags,
    secdata: u32,
    nv_signed_only: bool,
    fwmp: FwmpFlags,
    fwmp_key_hash: Option<Sha256Digest>,
    mtime: u32,
}

impl Default for TestEnv {
    fn default() -> Self {
        TestEnv {
            flags: ContextFlags::empty(),
            secdata: 0,
            nv_signed_only: false,
            fwmp: FwmpFlags::empty(),
            fwmp_key_hash: None,
            mtime: 0,
        }
    }
}

impl KernelVerificationEnv for TestEnv {
    fn sha256_digest(&mut self, data: &[u8]) -> VbootResult<Sha256Digest> {
        Ok(sha256(data))
    }

    fn rsa_verify(
        &mut self,
        key: &UnpackedKey,
        digest: &Sha256Digest,
        sig: &[u8],
    ) -> VbootResult<bool> {
        Ok(sig == fake_signature(key.material, digest, sig.len()).as_slice())
    }

    fn context_flags(&self) -> ContextFlags {
        self.flags
    }

    fn kernel_version_secdata(&self) -> u32 {
        self.secdata
    }

    fn nv_dev_boot_signed_only(&self) -> bool {
        self.nv_signed_only
    }

    fn fwmp_flags(&self) -> FwmpFlags {
        self.fwmp
    }

    fn fwmp_dev_key_hash(&self) -> Option<&Sha256Digest> {
        self.fwmp_key_hash.as_ref()
    }

    fn mtime_ms(&mut self) -> u32 {
        self.mtime += 7;
        self.mtime
    }
}

fn run(env: &mut TestEnv, disk: &mut FakeDisk) -> VbootResult<LoadedKernel> {
    run_with_buffer(env, disk, None)
}

fn run_with_buffer(
    env: &mut TestEnv,
    disk: &mut FakeDisk,
    kernel_buffer: Option<&mut [u8]>,
) -> VbootResult<LoadedKernel> {
    let subkey = build_packed_key(SUBKEY_MATERIAL);
    let params = LoadKernelParams {
        geometry: GEOMETRY,
        boot_flags: BootFlags::empty(),
        kernel_subkey: &subkey,
    };
    let mut backing = vec![0u8; KBUF_SIZE + 4096];
    let mut workbuf = WorkBuf::new(&mut backing);
    load_kernel(env, disk, &params, kernel_buffer, &mut workbuf)
}

#[test]
fn test_normal_boot_single_valid_kernel() {
    let mut env = TestEnv {
        secdata: 0x0001_0001,
        ..Default::default()
    };
    let mut disk = FakeDisk::new(vec![build_partition(&PartitionSpec::default())]);

    let kernel = run(&mut env, &mut disk).unwrap();
    assert_eq!(kernel.partition_number, 1);
    assert_eq!(kernel.partition_guid, [1u8; 16]);
    assert_eq!(kernel.kernel_version, 0x0002_0002);
    assert!(kernel.kernel_signed);
    assert_eq!(kernel.bootloader_address, 0x0020_0000);
    assert_eq!(kernel.bootloader_size, 512);
    assert_eq!(disk.marks(), vec![Some(EntryUpdate::Try)]);
    assert!(disk.written_back());
}

#[test]
fn test_normal_boot_rollback_attempt() {
    let mut env = TestEnv {
        secdata: 0x0002_0000,
        ..Default::default()
    };
    let mut disk = FakeDisk::new(vec![build_partition(&PartitionSpec {
        key_version: 1,
        kernel_version: 5,
        ..Default::default()
    })]);

    let result = run(&mut env, &mut disk);
    assert_eq!(
        result.err(),
        Some(VbootError::KERNEL_SCAN_ERR_INVALID_KERNEL_FOUND)
    );
    assert_eq!(disk.marks(), vec![Some(EntryUpdate::Bad)]);
    assert!(disk.written_back());
}

#[test]
fn test_recovery_boot_unsigned_kernel() {
    // Bad keyblock signature but valid hash and recovery-1 flag; the
    // secured counter is far ahead and must not matter in recovery mode.
    let mut env = TestEnv {
        flags: ContextFlags::RECOVERY_MODE,
        secdata: 0x0005_0005,
        ..Default::default()
    };
    let mut disk = FakeDisk::new(vec![build_partition(&PartitionSpec {
        keyblock_flags: (KeyblockFlags::DEVELOPER_0 | KeyblockFlags::RECOVERY_1).bits(),
        good_signature: false,
        ..Default::default()
    })]);

    let kernel = run(&mut env, &mut disk).unwrap();
    assert_eq!(kernel.partition_number, 1);
    assert!(!kernel.kernel_signed);
    assert_eq!(disk.marks(), vec![Some(EntryUpdate::Try)]);
}

#[test]
fn test_developer_boot_self_signed_stops_at_first() {
    let mut env = TestEnv {
        flags: ContextFlags::DEVELOPER_MODE,
        ..Default::default()
    };
    let spec = PartitionSpec {
        keyblock_flags: (KeyblockFlags::DEVELOPER_1 | KeyblockFlags::RECOVERY_0).bits(),
        good_signature: false,
        ..Default::default()
    };
    let mut disk = FakeDisk::new(vec![build_partition(&spec), build_partition(&spec)]);

    let kernel = run(&mut env, &mut disk).unwrap();
    assert_eq!(kernel.partition_number, 1);
    assert!(!kernel.kernel_signed);
    // No rollback protection applies, so the second candidate is never
    // examined.
    assert_eq!(disk.opens, vec![0]);
    assert_eq!(disk.marks(), vec![Some(EntryUpdate::Try), None]);
}

#[test]
fn test_developer_boot_official_only_enforced() {
    let mut env = TestEnv {
        flags: ContextFlags::DEVELOPER_MODE,
        nv_signed_only: true,
        ..Default::default()
    };
    let mut disk = FakeDisk::new(vec![build_partition(&PartitionSpec {
        keyblock_flags: (KeyblockFlags::DEVELOPER_1 | KeyblockFlags::RECOVERY_0).bits(),
        good_signature: false,
        ..Default::default()
    })]);

    let result = run(&mut env, &mut disk);
    assert_eq!(
        result.err(),
        Some(VbootError::KERNEL_SCAN_ERR_INVALID_KERNEL_FOUND)
    );
    assert_eq!(disk.marks(), vec![Some(EntryUpdate::Bad)]);
}

#[test]
fn test_two_signed_candidates_lowest_version_published() {
    let mut env = TestEnv {
        secdata: 0x0001_0001,
        ..Default::default()
    };
    let mut disk = FakeDisk::new(vec![
        build_partition(&PartitionSpec {
            key_version: 3,
            kernel_version: 3,
            ..Default::default()
        }),
        build_partition(&PartitionSpec {
            key_version: 2,
            kernel_version: 2,
            ..Default::default()
        }),
    ]);

    let kernel = run(&mut env, &mut disk).unwrap();
    // The first partition boots, but the published counter target is the
    // minimum signed version across the disk.
    assert_eq!(kernel.partition_number, 1);
    assert_eq!(kernel.kernel_version, 0x0002_0002);
    assert_eq!(disk.opens, vec![0, 1]);
    assert_eq!(disk.marks(), vec![Some(EntryUpdate::Try), None]);
}

#[test]
fn test_version_equal_to_counter_stops_scan() {
    let mut env = TestEnv {
        secdata: 0x0002_0002,
        ..Default::default()
    };
    let mut disk = FakeDisk::new(vec![
        build_partition(&PartitionSpec::default()),
        build_partition(&PartitionSpec {
            key_version: 3,
            kernel_version: 3,
            ..Default::default()
        }),
    ]);

    let kernel = run(&mut env, &mut disk).unwrap();
    // Equality with the secured counter means no advance and no need to
    // look further.
    assert_eq!(kernel.kernel_version, 0x0002_0002);
    assert_eq!(disk.opens, vec![0]);
}

#[test]
fn test_no_kernel_found() {
    let mut env = TestEnv::default();
    let mut disk = FakeDisk::new(vec![]);

    let result = run(&mut env, &mut disk);
    assert_eq!(
        result.err(),
        Some(VbootError::KERNEL_SCAN_ERR_NO_KERNEL_FOUND)
    );
    assert!(disk.written_back());
}

#[test]
fn test_partition_table_read_failure() {
    let mut env = TestEnv::default();
    let mut disk = FakeDisk::new(vec![build_partition(&PartitionSpec::default())]);
    disk.table_read_fails = true;

    let result = run(&mut env, &mut disk);
    assert_eq!(
        result.err(),
        Some(VbootError::KERNEL_SCAN_ERR_NO_KERNEL_FOUND)
    );
}

#[test]
fn test_stream_open_failure_marks_bad_and_continues() {
    let mut env = TestEnv {
        secdata: 0x0001_0001,
        ..Default::default()
    };
    let mut disk = FakeDisk::new(vec![
        build_partition(&PartitionSpec::default()),
        build_partition(&PartitionSpec::default()),
    ]);
    disk.stream_open_fails[0] = true;

    let kernel = run(&mut env, &mut disk).unwrap();
    assert_eq!(kernel.partition_number, 2);
    assert_eq!(kernel.partition_guid, [2u8; 16]);
    assert_eq!(
        disk.marks(),
        vec![Some(EntryUpdate::Bad), Some(EntryUpdate::Try)]
    );
}

#[test]
fn test_short_partition_marked_bad() {
    let mut env = TestEnv::default();
    let mut truncated = build_partition(&PartitionSpec::default());
    truncated.truncate(1000);
    let mut disk = FakeDisk::new(vec![truncated]);

    let result = run(&mut env, &mut disk);
    assert_eq!(
        result.err(),
        Some(VbootError::KERNEL_SCAN_ERR_INVALID_KERNEL_FOUND)
    );
    assert_eq!(disk.marks(), vec![Some(EntryUpdate::Bad)]);
    assert!(disk.written_back());
}

#[test]
fn test_nofail_boot_skips_try_mark() {
    let mut env = TestEnv {
        flags: ContextFlags::NOFAIL_BOOT,
        secdata: 0x0001_0001,
        ..Default::default()
    };
    let mut disk = FakeDisk::new(vec![build_partition(&PartitionSpec::default())]);

    let kernel = run(&mut env, &mut disk).unwrap();
    assert_eq!(kernel.partition_number, 1);
    assert_eq!(disk.marks(), vec![None]);
}

#[test]
fn test_body_loaded_at_declared_address() {
    let body: Vec<u8> = (0..100_000u32).map(|i| (i * 7) as u8).collect();
    let mut env = TestEnv {
        secdata: 0x0001_0001,
        ..Default::default()
    };
    let mut disk = FakeDisk::new(vec![build_partition(&PartitionSpec {
        body: body.clone(),
        ..Default::default()
    })]);

    let kernel = run(&mut env, &mut disk).unwrap();
    assert_eq!(kernel.partition_number, 1);
    // The body crossed the prefix-read boundary, so part of it was copied
    // and the rest streamed; the load target came from the preamble.
    assert_eq!(disk.last_load_address, Some(0x0010_0000));
    assert_eq!(disk.body_region, body);
}

#[test]
fn test_body_loaded_into_caller_buffer() {
    let body = b"caller buffer body".to_vec();
    let mut env = TestEnv {
        secdata: 0x0001_0001,
        ..Default::default()
    };
    let mut disk = FakeDisk::new(vec![build_partition(&PartitionSpec {
        body: body.clone(),
        ..Default::default()
    })]);

    let mut buffer = vec![0u8; 4096];
    let kernel = run_with_buffer(&mut env, &mut disk, Some(&mut buffer)).unwrap();
    assert_eq!(kernel.partition_number, 1);
    assert_eq!(&buffer[..body.len()], body.as_slice());
    // The collaborator buffer was never requested.
    assert_eq!(disk.last_load_address, None);
}

#[test]
fn test_caller_buffer_too_small() {
    let mut env = TestEnv::default();
    let mut disk = FakeDisk::new(vec![build_partition(&PartitionSpec {
        body: vec![0xa5; 1024],
        ..Default::default()
    })]);

    let mut buffer = vec![0u8; 16];
    let result = run_with_buffer(&mut env, &mut disk, Some(&mut buffer));
    assert_eq!(
        result.err(),
        Some(VbootError::KERNEL_SCAN_ERR_INVALID_KERNEL_FOUND)
    );
    assert_eq!(disk.marks(), vec![Some(EntryUpdate::Bad)]);
}

#[test]
fn test_corrupt_body_marked_bad() {
    let spec = PartitionSpec::default();
    let mut partition = build_partition(&spec);
    let body_offset = build_keyblock(&spec).len() + build_preamble(&spec).len();
    partition[body_offset] ^= 0xff;
    let mut env = TestEnv::default();
    let mut disk = FakeDisk::new(vec![partition]);

    let result = run(&mut env, &mut disk);
    assert_eq!(
        result.err(),
        Some(VbootError::KERNEL_SCAN_ERR_INVALID_KERNEL_FOUND)
    );
    assert_eq!(disk.marks(), vec![Some(EntryUpdate::Bad)]);
}

#[test]
fn test_first_invalid_then_valid_candidate() {
    let mut env = TestEnv {
        secdata: 0x0001_0001,
        ..Default::default()
    };
    let mut disk = FakeDisk::new(vec![
        build_partition(&PartitionSpec {
            good_signature: false,
            ..Default::default()
        }),
        build_partition(&PartitionSpec::default()),
    ]);

    let kernel = run(&mut env, &mut disk).unwrap();
    assert_eq!(kernel.partition_number, 2);
    assert!(kernel.kernel_signed);
    assert_eq!(
        disk.marks(),
        vec![Some(EntryUpdate::Bad), Some(EntryUpdate::Try)]
    );
}

#[test]
fn test_workbuf_too_small() {
    let mut env = TestEnv::default();
    let mut disk = FakeDisk::new(vec![build_partition(&PartitionSpec::default())]);

    let subkey = build_packed_key(SUBKEY_MATERIAL);
    let params = LoadKernelParams {
        geometry: GEOMETRY,
        boot_flags: BootFlags::empty(),
        kernel_subkey: &subkey,
    };
    let mut backing = vec![0u8; 1024];
    let mut workbuf = WorkBuf::new(&mut backing);
    let result = load_kernel(&mut env, &mut disk, &params, None, &mut workbuf);
    // The prefix buffer cannot be allocated; the candidate fails and the
    // scan reports all candidates invalid.
    assert_eq!(
        result.err(),
        Some(VbootError::KERNEL_SCAN_ERR_INVALID_KERNEL_FOUND)
    );
    assert!(disk.written_back());
}
