//! End-to-end engine scenarios over in-memory guest images.
//!
//! Every test goes through the public `Engine` API, which opens, mounts and
//! tears down a fresh session per call, so these also exercise the session
//! lifecycle and mount planning.

use std::path::Path;
use std::sync::Arc;
use vmdiff_core::{Error, FileKind, RowSize};
use vmdiff_engine::{
    decode_hex, format_bits, format_hex, BlockRange, Content, ContentLimits, Engine,
    EngineConfig,
};
use vmdiff_guest::{MemoryImage, MemoryNode, MemoryProvider, SessionLog};

// ── Fixtures ─────────────────────────────────────────────────────────────────

const PASSWD: &str = "\
root:x:0:0:root:/root:/bin/bash
daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin
alice:x:1000:1000:Alice:/home/alice:/bin/bash
bob:x:1001:1001:Bob:/home/bob:/bin/bash
";

const GROUP: &str = "\
root:x:0:
daemon:x:1:
alice:x:1000:
bob:x:1001:
staff:x:50:alice,bob
";

/// A two-partition guest:
///
/// ```text
/// /dev/sda2 on /      etc/passwd, etc/group, home/bob/*, srv/*
/// /dev/sda1 on /boot  vmlinuz, initrd.img (unreadable stat)
/// ```
fn guest_image() -> MemoryImage {
    MemoryImage::new()
        .os_root("/dev/sda2", &[("/boot", "/dev/sda1"), ("/", "/dev/sda2")])
        .file("/dev/sda2", "/etc/passwd", PASSWD)
        .file("/dev/sda2", "/etc/group", GROUP)
        .dir("/dev/sda2", "/boot")
        .node("/dev/sda2", "/home/bob", MemoryNode::dir().owner(1001, 1001))
        .node(
            "/dev/sda2",
            "/home/bob/report.txt",
            MemoryNode::file(vec![b'r'; 300]).owner(1001, 50),
        )
        .node(
            "/dev/sda2",
            "/home/bob/.profile",
            MemoryNode::file(vec![b'p'; 20]).owner(1001, 1001),
        )
        .node(
            "/dev/sda2",
            "/srv/blob.bin",
            MemoryNode::file(vec![0u8; 700]).owner(4242, 4242),
        )
        .node("/dev/sda2", "/srv/www", MemoryNode::symlink("/var/www"))
        .file("/dev/sda1", "/vmlinuz", vec![0x7Fu8; 64])
        .file("/dev/sda1", "/initrd.img", vec![1u8; 32])
        .broken_stat("/boot/initrd.img")
        .raw_disk(disk_bytes(20_000))
}

fn disk_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 256) as u8).collect()
}

fn engine_with(images: Vec<(&str, MemoryImage)>) -> (Engine, Arc<SessionLog>) {
    let provider = images
        .into_iter()
        .fold(MemoryProvider::new(), |p, (path, image)| p.with_image(path, image));
    let log = provider.log();
    let config = EngineConfig {
        progress_interval: 2,
        batch_blocks: 3,
        ..EngineConfig::default()
    };
    (Engine::with_config(provider, config), log)
}

fn guest_engine() -> (Engine, Arc<SessionLog>) {
    engine_with(vec![("guest.qcow2", guest_image())])
}

fn image() -> &'static Path {
    Path::new("guest.qcow2")
}

// ── Aggregation ──────────────────────────────────────────────────────────────

#[test]
fn test_per_owner_sums_match_totals() {
    let (engine, _) = guest_engine();
    let report = engine.disk_metadata(image()).unwrap();

    let user_files: u64 = report.per_user.iter().map(|u| u.files).sum();
    let user_bytes: u64 = report.per_user.iter().map(|u| u.bytes).sum();
    let group_files: u64 = report.per_group.iter().map(|g| g.files).sum();
    let group_bytes: u64 = report.per_group.iter().map(|g| g.bytes).sum();

    assert_eq!(user_files, report.files_count);
    assert_eq!(user_bytes, report.total_file_bytes);
    assert_eq!(group_files, report.files_count);
    assert_eq!(group_bytes, report.total_file_bytes);
}

#[test]
fn test_disk_metadata_counts() {
    let (engine, _) = guest_engine();
    let report = engine.disk_metadata(image()).unwrap();

    // passwd, group, report.txt, .profile, blob.bin, vmlinuz; initrd.img has no stat
    assert_eq!(report.files_count, 6);
    assert_eq!(
        report.total_file_bytes,
        (PASSWD.len() + GROUP.len() + 300 + 20 + 700 + 64) as u64
    );
    // boot, etc, home, home/bob, srv
    assert_eq!(report.dirs_count, 5);
    assert_eq!(report.total_dir_bytes, 5 * 4096);
    assert_eq!(report.total_bytes, report.total_file_bytes + report.total_dir_bytes);

    assert_eq!(report.users_total, 4);
    assert_eq!(report.users_with_files, 3);
    assert_eq!(report.groups_total, 5);
}

#[test]
fn test_breakdown_order_and_synthetic_names() {
    let (engine, _) = guest_engine();
    let report = engine.disk_metadata(image()).unwrap();

    let users: Vec<(&str, u64)> = report
        .per_user
        .iter()
        .map(|u| (u.user.as_str(), u.bytes))
        .collect();
    let root_bytes = (PASSWD.len() + GROUP.len() + 64) as u64;
    assert_eq!(
        users,
        vec![
            ("uid_4242", 700),
            ("bob", 320),
            ("root", root_bytes),
            ("daemon", 0),
            ("alice", 0),
        ]
    );

    let bob = &report.per_user[1];
    assert_eq!((bob.uid, bob.files, bob.dirs), (1001, 2, 1));

    let staff = report.per_group.iter().find(|g| g.group == "staff").unwrap();
    assert_eq!((staff.gid, staff.files, staff.bytes), (50, 1, 300));
}

#[test]
fn test_zero_usage_user_is_listed() {
    let image = MemoryImage::single_root("/dev/vda1")
        .file("/dev/vda1", "/etc/passwd", "alice:x:1000:1000::/home/alice:/bin/sh\n")
        .file("/dev/vda1", "/hello.txt", "hi");
    let (engine, _) = engine_with(vec![("alice.img", image)]);

    let report = engine.disk_metadata(Path::new("alice.img")).unwrap();
    let alice = report.per_user.iter().find(|u| u.uid == 1000).unwrap();
    assert_eq!(alice.user, "alice");
    assert_eq!((alice.files, alice.dirs, alice.bytes), (0, 0, 0));
}

#[test]
fn test_missing_identity_files_fall_back() {
    let image = MemoryImage::single_root("/dev/vda1")
        .node("/dev/vda1", "/data", MemoryNode::file("x").owner(7, 8));
    let (engine, _) = engine_with(vec![("bare.img", image)]);

    let report = engine.disk_metadata(Path::new("bare.img")).unwrap();
    assert_eq!(report.users_total, 0);
    assert_eq!(report.per_user[0].user, "uid_7");
    assert_eq!(report.per_group[0].group, "gid_8");
}

// ── Walking and listing ──────────────────────────────────────────────────────

#[test]
fn test_walks_are_deterministic() {
    let (engine, _) = guest_engine();
    let first = engine.walk_entries(image()).unwrap();
    let second = engine.walk_entries(image()).unwrap();
    assert_eq!(first, second);
    assert!(first.iter().any(|e| e.path == "/boot/vmlinuz"));
}

#[test]
fn test_failed_stat_degrades_row() {
    let (engine, _) = guest_engine();
    let rows = engine.list_files(image()).unwrap();

    let initrd = rows.iter().find(|r| r.path == "/boot/initrd.img").unwrap();
    assert_eq!(initrd.size, RowSize::Unknown);
    assert_eq!(initrd.permissions, "-");
    assert_eq!(initrd.modified_time, "-");

    let link = rows.iter().find(|r| r.path == "/srv/www").unwrap();
    assert_eq!(link.permissions, "rwxrwxrwx");
}

#[test]
fn test_hidden_under_mount_is_not_listed() {
    let image = guest_image().file("/dev/sda2", "/boot/stale-kernel", "old");
    let (engine, _) = engine_with(vec![("guest.qcow2", image)]);

    let names = engine.list_all_filenames(Path::new("guest.qcow2")).unwrap();
    assert!(!names.iter().any(|n| n == "/boot/stale-kernel"));
    assert!(names.iter().any(|n| n == "/boot/vmlinuz"));

    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
}

#[test]
fn test_files_with_metadata_json() {
    let (engine, _) = guest_engine();
    let rows = engine.list_files(image()).unwrap();
    let json = engine.files_with_metadata_json(image()).unwrap();

    let object = json.as_object().unwrap();
    assert_eq!(object.len(), rows.len());
    assert_eq!(json["1"]["Name"], rows[0].path.as_str());
}

#[test]
fn test_list_filenames_in_directory() {
    let (engine, _) = guest_engine();
    let names = engine
        .list_filenames_in_directory(image(), "home/")
        .unwrap();
    assert_eq!(
        names,
        vec!["/home/bob", "/home/bob/.profile", "/home/bob/report.txt"]
    );
}

#[test]
fn test_directory_listing_and_exists() {
    let (engine, _) = guest_engine();

    let listing = engine.list_directory(image(), "/home/bob/", true).unwrap();
    assert_eq!(listing.names(), vec![".profile", "report.txt"]);
    let report = listing.entries[1].status.as_ref().unwrap();
    assert_eq!(report.owner, Some(1001));
    assert_eq!(report.size, RowSize::Bytes(300));

    let status = engine.check_file_exists(image(), "boot").unwrap();
    assert!(status.exists);
    assert_eq!(status.kind, Some(FileKind::Dir));

    let missing = engine.check_file_exists(image(), "/etc/shadow").unwrap();
    assert!(!missing.exists);
}

// ── Content ──────────────────────────────────────────────────────────────────

#[test]
fn test_hello_scenario() {
    let image = MemoryImage::single_root("/dev/vda1").file("/dev/vda1", "/hello.txt", [0x68, 0x69]);
    let (engine, _) = engine_with(vec![("hello.img", image)]);
    let path = Path::new("hello.img");
    let all = ContentLimits::unlimited();

    assert_eq!(engine.file_contents_in_format(path, "/hello.txt", "hex", &all).unwrap(), "68 69");
    assert_eq!(
        engine.file_contents_in_format(path, "hello.txt", "bits", &all).unwrap(),
        "0110100001101001"
    );

    let rows = engine.list_files(path).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].size, RowSize::Bytes(2));
}

#[test]
fn test_truncation_ordering() {
    let image = MemoryImage::single_root("/dev/vda1").file("/dev/vda1", "/t.txt", "abcXdef");
    let (engine, _) = engine_with(vec![("t.img", image)]);
    let path = Path::new("t.img");

    let stopped = engine
        .file_contents(path, "/t.txt", false, &ContentLimits::from_read(5, "X"))
        .unwrap();
    assert_eq!(stopped, Content::Text("abc".to_string()));

    let limited = engine
        .file_contents(path, "/t.txt", true, &ContentLimits::from_read(3, ""))
        .unwrap();
    assert_eq!(limited, Content::Binary(b"abc".to_vec()));
}

#[test]
fn test_binary_content_is_exact() {
    let bytes = vec![0x00, 0xFF, 0x00, 0x0A, 0xC3, 0x28];
    let image = MemoryImage::single_root("/dev/vda1").file("/dev/vda1", "/bin.dat", bytes.clone());
    let scratch = tempfile::tempdir().unwrap();
    let provider = MemoryProvider::new().with_image("bin.img", image);
    let engine = Engine::with_config(provider, EngineConfig::default().with_scratch_dir(scratch.path()));

    let content = engine
        .file_contents(Path::new("bin.img"), "/bin.dat", true, &ContentLimits::unlimited())
        .unwrap();
    assert_eq!(content.as_bytes(), &bytes[..]);

    // scratch downloads are cleaned up
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[test]
fn test_hex_and_bits_laws() {
    let samples: [&[u8]; 4] = [b"", b"\x00", b"hello, world", &[0xFF, 0x00, 0x80, 0x7F]];
    for bytes in samples {
        assert_eq!(decode_hex(&format_hex(bytes)).unwrap(), bytes);

        let bits = format_bits(bytes);
        assert_eq!(bits.len(), 8 * bytes.len());
        assert!(bits.chars().all(|c| c == '0' || c == '1'));
    }
}

#[test]
fn test_content_errors() {
    let (engine, log) = guest_engine();
    let all = ContentLimits::unlimited();

    let missing = engine.file_contents(image(), "/nope", true, &all);
    assert!(matches!(missing, Err(Error::NotFound(_))));

    let directory = engine.file_contents(image(), "/etc", true, &all);
    assert!(matches!(directory, Err(Error::Io(_))));

    let format = engine.file_contents_in_format(image(), "/etc/passwd", "base64", &all);
    assert!(matches!(format, Err(Error::Format(_))));

    assert_eq!(log.live(), 0);
}

// ── Sessions ─────────────────────────────────────────────────────────────────

#[test]
fn test_no_os_is_not_found_and_cleaned_up() {
    let (engine, log) = engine_with(vec![("blank.img", MemoryImage::new())]);
    let result = engine.list_files(Path::new("blank.img"));

    assert!(matches!(result, Err(Error::NotFound(_))));
    assert_eq!(log.opened(), 1);
    assert_eq!(log.closed(), 1);
    assert_eq!(log.shut_down(), 1);
}

#[test]
fn test_unopenable_image_is_access_error() {
    let (engine, log) = guest_engine();
    let result = engine.disk_metadata(Path::new("other.qcow2"));
    assert!(matches!(result, Err(Error::Access(_))));
    assert_eq!(log.opened(), 0);
}

#[test]
fn test_partial_mount_keeps_going() {
    let image = guest_image().failing_mount("/dev/sda1");
    let (engine, log) = engine_with(vec![("guest.qcow2", image)]);

    let names = engine.list_all_filenames(Path::new("guest.qcow2")).unwrap();
    assert!(names.iter().any(|n| n == "/etc/passwd"));
    assert!(!names.iter().any(|n| n == "/boot/vmlinuz"));
    assert_eq!(log.live(), 0);
}

#[test]
fn test_concurrent_calls_use_separate_sessions() {
    let (engine, log) = guest_engine();

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| engine.disk_metadata(image()).unwrap()))
            .collect();
        let reports: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(reports.windows(2).all(|pair| pair[0] == pair[1]));
    });

    assert_eq!(log.opened(), 4);
    assert_eq!(log.live(), 0);
}

// ── Blocks ───────────────────────────────────────────────────────────────────

#[test]
fn test_self_diff_is_empty() {
    let (engine, _) = guest_engine();
    let report = engine
        .diff_blocks(image(), image(), None, BlockRange::full())
        .unwrap();

    assert!(report.is_identical());
    assert_eq!(report.block_size, 4096);
    assert_eq!(report.end_block, Some(4));
}

#[test]
fn test_diff_between_images() {
    let mut changed = disk_bytes(20_000);
    changed[4096 * 3 + 10] ^= 0x55;
    changed.truncate(18_000);

    let (engine, log) = engine_with(vec![
        ("a.img", guest_image()),
        ("b.img", guest_image().raw_disk(changed)),
    ]);

    let report = engine
        .diff_blocks(Path::new("a.img"), Path::new("b.img"), Some(4096), BlockRange::full())
        .unwrap();
    assert_eq!(report.labels(), vec!["Block-3", "Block-4"]);
    assert_eq!(report.total_differing_blocks, 2);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["differing_blocks"][1], "Block-4");

    let head = engine
        .diff_blocks(Path::new("a.img"), Path::new("b.img"), Some(4096), BlockRange::new(0, 2))
        .unwrap();
    assert!(head.is_identical());

    assert!(matches!(
        engine.diff_blocks(Path::new("a.img"), Path::new("b.img"), None, BlockRange::new(3, 1)),
        Err(Error::InvalidBlockRange(_))
    ));
    assert_eq!(log.live(), 0);
}

#[test]
fn test_block_data() {
    let (engine, _) = guest_engine();
    let hex = engine.get_block_data(image(), 0, Some(4), "hex").unwrap();
    assert_eq!(hex, format_hex(&disk_bytes(4)));

    let tail = engine.read_block(image(), 4, None).unwrap();
    assert_eq!(tail.len(), 20_000 - 4 * 4096);

    assert!(matches!(
        engine.read_block(image(), 5, None),
        Err(Error::NotFound(_))
    ));
}
