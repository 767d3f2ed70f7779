//! Directory and long-file-name tests

use embedded_fat::{Error, File, FileName, OpenFlags, Volume};

mod utils;

type TestVolume = Volume<utils::RamDisk, utils::TestTimeSource>;

fn fat16_volume() -> TestVolume {
    Volume::new(
        utils::RamDisk::new(utils::format_fat16()),
        utils::make_time_source(),
    )
    .expect("mount fat16")
}

fn list_names(volume: &TestVolume, path: &str) -> Vec<String> {
    let mut names = Vec::new();
    volume
        .ls(path, |entry| names.push(format!("{}", entry.name)))
        .expect("ls");
    names
}

#[test]
fn mkdir_then_rmdir() {
    let volume = fat16_volume();
    assert!(!volume.exists("STUFF"));
    volume.mkdir("STUFF", false).expect("mkdir");
    assert!(volume.exists("STUFF"));
    // a second mkdir collides
    assert!(matches!(
        volume.mkdir("STUFF", false),
        Err(Error::FileAlreadyExists)
    ));
    volume.rmdir("STUFF").expect("rmdir");
    assert!(!volume.exists("STUFF"));
}

#[test]
fn mkdir_creates_parents_on_request() {
    let volume = fat16_volume();
    assert!(matches!(
        volume.mkdir("A/B/C", false),
        Err(Error::NotFound)
    ));
    volume.mkdir("/A/B/C", true).expect("mkdir -p");
    assert!(volume.exists("A"));
    assert!(volume.exists("A/B"));
    assert!(volume.exists("A/B/C"));
}

#[test]
fn new_directories_have_dot_entries() {
    let volume = fat16_volume();
    volume.mkdir("OUTER", false).expect("mkdir");
    volume.mkdir("OUTER/INNER", false).expect("mkdir");
    volume
        .open("OUTER/INNER/F.TXT", OpenFlags::WRITE | OpenFlags::CREAT)
        .expect("create")
        .close()
        .expect("close");

    // ".." leads back to OUTER, where INNER can be found again
    assert!(volume.exists("OUTER/INNER/../INNER/F.TXT"));
    // "." is the directory itself
    assert!(volume.exists("OUTER/INNER/./F.TXT"));
    // the dot entries don't show up in listings
    assert_eq!(list_names(&volume, "OUTER/INNER"), vec!["F.TXT"]);
}

#[test]
fn listing_shows_files_and_directories() {
    let volume = fat16_volume();
    volume.mkdir("SUB", false).expect("mkdir");
    for name in ["ONE.TXT", "TWO.TXT"] {
        let mut f = volume
            .open(name, OpenFlags::WRITE | OpenFlags::CREAT)
            .expect("create");
        f.write(name.as_bytes()).expect("write");
        f.close().expect("close");
    }

    let mut listed = Vec::new();
    volume
        .ls("/", |entry| {
            listed.push((
                format!("{}", entry.name),
                entry.size,
                entry.attributes.is_directory(),
            ));
        })
        .expect("ls");
    assert_eq!(
        listed,
        vec![
            (String::from("SUB"), 0, true),
            (String::from("ONE.TXT"), 7, false),
            (String::from("TWO.TXT"), 7, false),
        ]
    );
}

#[test]
fn open_next_walks_a_directory() {
    let volume = fat16_volume();
    for name in ["A.TXT", "B.TXT", "C.TXT"] {
        volume
            .open(name, OpenFlags::WRITE | OpenFlags::CREAT)
            .expect("create")
            .close()
            .expect("close");
    }
    let mut root = volume.open_root();
    let mut seen = 0;
    while let Some(file) = File::open_next(&mut root, OpenFlags::READ).expect("open_next") {
        assert!(file.is_file());
        seen += 1;
    }
    assert_eq!(seen, 3);
}

#[test]
fn rename_file_moves_the_entry_and_keeps_contents() {
    let volume = fat16_volume();
    let mut f = volume
        .open("FOO.TXT", OpenFlags::RDWR | OpenFlags::CREAT)
        .expect("create");
    f.write(b"payload").expect("write");
    f.close().expect("close");
    volume
        .open("BAR.TXT", OpenFlags::WRITE | OpenFlags::CREAT)
        .expect("create")
        .close()
        .expect("close");

    // the destination already exists
    assert!(matches!(
        volume.rename("FOO.TXT", "BAR.TXT"),
        Err(Error::FileAlreadyExists)
    ));

    volume.rename("FOO.TXT", "BAZ.TXT").expect("rename");
    assert!(!volume.exists("FOO.TXT"));
    assert!(volume.exists("BAZ.TXT"));
    let mut f = volume.open("BAZ.TXT", OpenFlags::READ).expect("open");
    let mut buffer = [0u8; 16];
    let n = f.read(&mut buffer).expect("read");
    assert_eq!(&buffer[..n], b"payload");
}

#[test]
fn rename_directory_updates_dot_dot() {
    let volume = fat16_volume();
    volume.mkdir("DIR1", false).expect("mkdir");
    let mut f = volume
        .open("DIR1/F.TXT", OpenFlags::WRITE | OpenFlags::CREAT)
        .expect("create");
    f.write(b"inside").expect("write");
    f.close().expect("close");
    volume.mkdir("DEST", false).expect("mkdir");

    volume.rename("DIR1", "DEST/DIR2").expect("rename dir");
    assert!(!volume.exists("DIR1"));
    assert!(volume.exists("DEST/DIR2/F.TXT"));
    // '..' must now point at DEST, not the root
    assert!(volume.exists("DEST/DIR2/../DIR2/F.TXT"));
}

#[test]
fn rmdir_refuses_a_non_empty_directory() {
    let volume = fat16_volume();
    volume.mkdir("NEST", false).expect("mkdir");
    volume.mkdir("NEST/SUB", false).expect("mkdir");
    for name in ["NEST/A.TXT", "NEST/B.TXT", "NEST/SUB/C.TXT"] {
        let mut f = volume
            .open(name, OpenFlags::WRITE | OpenFlags::CREAT)
            .expect("create");
        f.write(b"x").expect("write");
        f.close().expect("close");
    }

    assert!(matches!(
        volume.rmdir("NEST"),
        Err(Error::DirectoryNotEmpty)
    ));
    volume.remove_recursive("NEST").expect("rm -rf");
    assert!(!volume.exists("NEST"));
    assert_eq!(list_names(&volume, "/").len(), 0);
}

#[test]
fn remove_refuses_directories() {
    let volume = fat16_volume();
    volume.mkdir("D", false).expect("mkdir");
    assert!(matches!(volume.remove("D"), Err(Error::OpenedDirAsFile)));
    // and rmdir refuses files
    volume
        .open("F.TXT", OpenFlags::WRITE | OpenFlags::CREAT)
        .expect("create")
        .close()
        .expect("close");
    assert!(matches!(volume.rmdir("F.TXT"), Err(Error::OpenedFileAsDir)));
}

#[test]
fn long_names_round_trip() {
    let volume = fat16_volume();
    let fname = FileName::with_alias("LONG_N~1.TXT", "long_name_example.txt").expect("name");
    {
        let mut root = volume.open_root();
        let mut f = File::open_in(&mut root, &fname, OpenFlags::RDWR | OpenFlags::CREAT)
            .expect("create lfn");
        f.write(b"long name payload").expect("write");
        f.close().expect("close");
    }

    // match via the long name (case-sensitive)
    let mut f = volume
        .open("long_name_example.txt", OpenFlags::READ)
        .expect("open by long name");
    let mut buffer = [0u8; 32];
    let n = f.read(&mut buffer).expect("read");
    assert_eq!(&buffer[..n], b"long name payload");
    assert!(matches!(
        volume.open("LONG_NAME_EXAMPLE.TXT", OpenFlags::READ),
        Err(Error::NotFound)
    ));

    // match via the 8.3 alias
    assert!(volume.exists("LONG_N~1.TXT"));

    // the listing shows the single short entry
    assert_eq!(list_names(&volume, "/"), vec!["LONG_N~1.TXT"]);
}

#[test]
fn removing_a_long_name_clears_every_slot() {
    let volume = fat16_volume();
    let fname = FileName::with_alias("LONG_N~1.TXT", "long_name_example.txt").expect("name");
    {
        let mut root = volume.open_root();
        let mut f = File::open_in(&mut root, &fname, OpenFlags::RDWR | OpenFlags::CREAT)
            .expect("create lfn");
        f.write(b"doomed").expect("write");
        f.close().expect("close");
    }

    volume
        .remove("long_name_example.txt")
        .expect("remove by long name");
    assert!(!volume.exists("long_name_example.txt"));
    assert!(!volume.exists("LONG_N~1.TXT"));
    assert_eq!(list_names(&volume, "/").len(), 0);

    // the three freed slots (two name fragments plus the entry) are
    // reused by the next long-named file
    let fname = FileName::with_alias("OTHER_~1.TXT", "other_long_name.txt").expect("name");
    let mut root = volume.open_root();
    File::open_in(&mut root, &fname, OpenFlags::WRITE | OpenFlags::CREAT)
        .expect("create second lfn")
        .close()
        .expect("close");
    let f =
        File::open_by_index(&mut root, 2, OpenFlags::READ).expect("short entry back in slot 2");
    assert!(f.is_file());
}

#[test]
fn open_by_index_validates_the_slot() {
    let volume = fat16_volume();
    volume
        .open("IDX.TXT", OpenFlags::WRITE | OpenFlags::CREAT)
        .expect("create")
        .close()
        .expect("close");
    let mut root = volume.open_root();
    let f = File::open_by_index(&mut root, 0, OpenFlags::READ).expect("open slot 0");
    assert!(f.is_file());
    assert!(matches!(
        File::open_by_index(&mut root, 7, OpenFlags::READ),
        Err(Error::NotFound)
    ));
}

#[test]
fn directory_grows_past_one_cluster() {
    let volume = fat16_volume();
    volume.mkdir("MANY", false).expect("mkdir");
    // a one-sector cluster holds 16 entries; 40 files (plus dot entries)
    // force two extra clusters
    for i in 0..40 {
        let name = format!("MANY/F{:03}.TXT", i);
        let mut f = volume
            .open(&name, OpenFlags::WRITE | OpenFlags::CREAT)
            .expect("create");
        f.write(name.as_bytes()).expect("write");
        f.close().expect("close");
    }
    for i in 0..40 {
        let name = format!("MANY/F{:03}.TXT", i);
        let mut f = volume.open(&name, OpenFlags::READ).expect("open");
        assert_eq!(f.length() as usize, name.len());
        let mut buffer = [0u8; 32];
        let n = f.read(&mut buffer).expect("read");
        assert_eq!(&buffer[..n], name.as_bytes());
    }
    assert_eq!(list_names(&volume, "MANY").len(), 40);
    volume.remove_recursive("MANY").expect("rm -rf");
    assert!(!volume.exists("MANY"));
}
