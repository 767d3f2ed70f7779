//! Volume mounting tests

use embedded_fat::{FatType, OpenFlags, Volume, VolumeIdx};

mod utils;

#[test]
fn mounts_unpartitioned_fat16() {
    let volume = Volume::new(
        utils::RamDisk::new(utils::format_fat16()),
        utils::make_time_source(),
    )
    .expect("mount");
    assert_eq!(volume.partition().fat_type(), FatType::Fat16);
    assert_eq!(volume.partition().volume_label(), b"EMBFAT TEST");
    let mut count = 0;
    volume.ls("/", |_| count += 1).expect("ls");
    assert_eq!(count, 0);
}

#[test]
fn mounts_and_uses_fat12() {
    let volume = Volume::new(
        utils::RamDisk::new(utils::format_fat12()),
        utils::make_time_source(),
    )
    .expect("mount");
    assert_eq!(volume.partition().fat_type(), FatType::Fat12);

    volume.mkdir("DATA", false).expect("mkdir");
    let mut file = volume
        .open("DATA/SAMPLE.BIN", OpenFlags::RDWR | OpenFlags::CREAT)
        .expect("create");
    let data: Vec<u8> = (0..1500u32).map(|n| (n % 241) as u8).collect();
    file.write(&data).expect("write");
    file.close().expect("close");

    let mut file = volume
        .open("DATA/SAMPLE.BIN", OpenFlags::READ)
        .expect("reopen");
    assert_eq!(file.length(), 1500);
    let mut readback = vec![0u8; 1500];
    assert_eq!(file.read(&mut readback).expect("read"), 1500);
    assert_eq!(readback, data);

    volume.remove("DATA/SAMPLE.BIN").expect("remove");
    volume.rmdir("DATA").expect("rmdir");
    assert!(!volume.exists("DATA"));
}

#[test]
fn mounts_and_uses_fat32() {
    let volume = Volume::new(
        utils::RamDisk::new(utils::format_fat32_default()),
        utils::make_time_source(),
    )
    .expect("mount");
    assert_eq!(volume.partition().fat_type(), FatType::Fat32);
    assert_eq!(volume.partition().volume_label(), b"EMBFAT TEST");

    // the FAT32 root is a cluster chain; push it past one cluster
    for i in 0..20 {
        let name = format!("ROOT{:02}.TXT", i);
        let mut f = volume
            .open(&name, OpenFlags::WRITE | OpenFlags::CREAT)
            .expect("create");
        f.write(name.as_bytes()).expect("write");
        f.close().expect("close");
    }
    let mut count = 0;
    volume.ls("/", |_| count += 1).expect("ls");
    assert_eq!(count, 20);

    volume.mkdir("SUB/DIR", true).expect("mkdir");
    let mut f = volume
        .open("SUB/DIR/DEEP.TXT", OpenFlags::RDWR | OpenFlags::CREAT)
        .expect("create");
    f.write(b"fat32 subdir data").expect("write");
    f.close().expect("close");
    let mut f = volume
        .open("SUB/DIR/DEEP.TXT", OpenFlags::READ)
        .expect("reopen");
    let mut buffer = [0u8; 32];
    let n = f.read(&mut buffer).expect("read");
    assert_eq!(&buffer[..n], b"fat32 subdir data");

    volume.remove_recursive("SUB").expect("rm -rf");
    assert!(!volume.exists("SUB"));
}

#[test]
fn mounts_an_mbr_partition() {
    let image = utils::with_mbr(utils::format_fat16(), 2048, 0x06);
    let volume = Volume::new_with_partition(
        utils::RamDisk::new(image),
        utils::make_time_source(),
        VolumeIdx(0),
    )
    .expect("mount partition 0");
    assert_eq!(volume.partition().fat_type(), FatType::Fat16);

    let mut file = volume
        .open("OFFSET.TXT", OpenFlags::RDWR | OpenFlags::CREAT)
        .expect("create");
    file.write(b"lba offsets apply").expect("write");
    file.rewind();
    let mut buffer = [0u8; 32];
    let n = file.read(&mut buffer).expect("read");
    assert_eq!(&buffer[..n], b"lba offsets apply");
    file.close().expect("close");

    // the plain constructor finds the same partition by itself
    let (device, time_source) = volume.free().expect("free");
    let volume = Volume::new(device, time_source).expect("remount");
    assert!(volume.exists("OFFSET.TXT"));
}

#[test]
fn data_survives_a_remount() {
    let volume = Volume::new(
        utils::RamDisk::new(utils::format_fat16()),
        utils::make_time_source(),
    )
    .expect("mount");
    let mut file = volume
        .open("KEEP.TXT", OpenFlags::RDWR | OpenFlags::CREAT)
        .expect("create");
    file.write(b"durable").expect("write");
    file.close().expect("close");

    let (device, time_source) = volume.free().expect("free");
    let image = device.into_inner();
    let volume = Volume::new(utils::RamDisk::new(image), utils::make_time_source())
        .expect("remount");
    drop(time_source);

    let mut file = volume.open("KEEP.TXT", OpenFlags::READ).expect("open");
    let mut buffer = [0u8; 16];
    let n = file.read(&mut buffer).expect("read");
    assert_eq!(&buffer[..n], b"durable");
}
