//! Warm-boot archive.
//!
//! Before a warm reboot the hardware SDK state cache and the backend
//! snapshot are bundled into a single file that survives the reboot, and
//! unpacked into the snapshot directory on the way back up.
//!
//! Format:
//! - magic `SDMA`
//! - format version (`u32`, big-endian)
//! - member count (`u32`, big-endian)
//! - zstd-compressed payload: per member, name length (`u16`), name bytes,
//!   data length (`u64`), data bytes

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use zstd::stream::{Decoder, Encoder};

use crate::error::{DmError, DmResult};

/// Archive file magic bytes.
const ARCHIVE_MAGIC: [u8; 4] = *b"SDMA";

/// Current archive format version.
pub const ARCHIVE_VERSION: u32 = 1;

const COMPRESSION_LEVEL: i32 = 3;

/// One archived file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMember {
    pub name: String,
    pub size: u64,
}

/// Packs and unpacks warm-boot archives.
#[derive(Debug, Clone)]
pub struct WarmArchive {
    path: PathBuf,
}

fn check_member_name(name: &str) -> DmResult<()> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(DmError::archive(format!("illegal member name {:?}", name)));
    }
    if name.len() > usize::from(u16::MAX) {
        return Err(DmError::archive(format!(
            "member name of {} bytes is too long",
            name.len()
        )));
    }
    Ok(())
}

impl WarmArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bundles `members` into the archive.
    ///
    /// Each member is `(name, source file)`. Names must be plain file names.
    /// The archive is written to a temporary file and renamed into place.
    pub fn pack<P: AsRef<Path>>(&self, members: &[(&str, P)]) -> DmResult<usize> {
        for (name, _) in members {
            check_member_name(name)?;
        }
        let count = u32::try_from(members.len())
            .map_err(|_| DmError::archive("too many archive members"))?;

        let mut payload = Vec::new();
        {
            let mut encoder = Encoder::new(&mut payload, COMPRESSION_LEVEL)?;
            for (name, source) in members {
                let data = fs::read(source.as_ref())?;
                encoder.write_u16::<BigEndian>(name.len() as u16)?;
                encoder.write_all(name.as_bytes())?;
                encoder.write_u64::<BigEndian>(data.len() as u64)?;
                encoder.write_all(&data)?;
                debug!("archive: added {} ({} bytes)", name, data.len());
            }
            encoder.finish()?;
        }

        let tmp = self.path.with_extension("tmp");
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            out.write_all(&ARCHIVE_MAGIC)?;
            out.write_u32::<BigEndian>(ARCHIVE_VERSION)?;
            out.write_u32::<BigEndian>(count)?;
            out.write_all(&payload)?;
            out.flush()?;
        }
        fs::rename(&tmp, &self.path)?;

        info!(
            "Packed {} members into {} ({} compressed bytes)",
            members.len(),
            self.path.display(),
            payload.len()
        );
        Ok(members.len())
    }

    /// Reads and validates the header, returning the member count and the
    /// decompressed payload stream.
    fn open_payload(&self) -> DmResult<(u32, Decoder<'static, BufReader<BufReader<File>>>)> {
        let mut input = BufReader::new(File::open(&self.path)?);

        let mut magic = [0u8; 4];
        input.read_exact(&mut magic)?;
        if magic != ARCHIVE_MAGIC {
            return Err(DmError::archive(format!(
                "{} is not a warm-boot archive",
                self.path.display()
            )));
        }
        let version = input.read_u32::<BigEndian>()?;
        if version != ARCHIVE_VERSION {
            return Err(DmError::archive(format!(
                "unsupported archive version {}",
                version
            )));
        }
        let count = input.read_u32::<BigEndian>()?;
        let decoder = Decoder::new(input)?;
        Ok((count, decoder))
    }

    fn read_member(payload: &mut impl Read) -> DmResult<(String, Vec<u8>)> {
        let name_len = payload.read_u16::<BigEndian>()?;
        let mut name = vec![0u8; usize::from(name_len)];
        payload.read_exact(&mut name)?;
        let name = String::from_utf8(name)
            .map_err(|_| DmError::archive("member name is not UTF-8"))?;
        check_member_name(&name)?;

        let size = payload.read_u64::<BigEndian>()?;
        let mut data = Vec::new();
        payload.take(size).read_to_end(&mut data)?;
        if data.len() as u64 != size {
            return Err(DmError::archive(format!(
                "member {} truncated: {} of {} bytes",
                name,
                data.len(),
                size
            )));
        }
        Ok((name, data))
    }

    /// Writes every member under `dest_dir` and returns their names.
    pub fn unpack(&self, dest_dir: impl AsRef<Path>) -> DmResult<Vec<String>> {
        let dest_dir = dest_dir.as_ref();
        fs::create_dir_all(dest_dir)?;

        let (count, mut payload) = self.open_payload()?;
        let mut names = Vec::new();
        for _ in 0..count {
            let (name, data) = Self::read_member(&mut payload)?;
            fs::write(dest_dir.join(&name), &data)?;
            debug!("archive: restored {} ({} bytes)", name, data.len());
            names.push(name);
        }

        info!(
            "Unpacked {} members from {} into {}",
            names.len(),
            self.path.display(),
            dest_dir.display()
        );
        Ok(names)
    }

    /// Lists member names and sizes without writing anything.
    pub fn list(&self) -> DmResult<Vec<ArchiveMember>> {
        let (count, mut payload) = self.open_payload()?;
        let mut members = Vec::new();
        for _ in 0..count {
            let (name, data) = Self::read_member(&mut payload)?;
            members.push(ArchiveMember {
                name,
                size: data.len() as u64,
            });
        }
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn test_pack_unpack() {
        let src = TempDir::new().unwrap();
        let cache = write(src.path(), "cache.bin", &[7u8; 1000]);
        let snap = write(src.path(), "snap.json", b"{\"tables\":[]}");

        let archive = WarmArchive::new(src.path().join("wb.sdma"));
        let packed = archive
            .pack(&[("sdk_state_cache.bin", &cache), ("datamgr_snapshot.json", &snap)])
            .unwrap();
        assert_eq!(packed, 2);

        let dest = TempDir::new().unwrap();
        let names = archive.unpack(dest.path()).unwrap();
        assert_eq!(names, vec!["sdk_state_cache.bin", "datamgr_snapshot.json"]);
        assert_eq!(
            fs::read(dest.path().join("sdk_state_cache.bin")).unwrap(),
            vec![7u8; 1000]
        );
        assert_eq!(
            fs::read(dest.path().join("datamgr_snapshot.json")).unwrap(),
            b"{\"tables\":[]}".to_vec()
        );
    }

    #[test]
    fn test_list_members() {
        let src = TempDir::new().unwrap();
        let a = write(src.path(), "a", b"abc");
        let b = write(src.path(), "b", b"");

        let archive = WarmArchive::new(src.path().join("wb.sdma"));
        archive.pack(&[("a", &a), ("b", &b)]).unwrap();
        assert_eq!(
            archive.list().unwrap(),
            vec![
                ArchiveMember {
                    name: "a".to_string(),
                    size: 3
                },
                ArchiveMember {
                    name: "b".to_string(),
                    size: 0
                },
            ]
        );
    }

    #[test]
    fn test_rejects_path_members() {
        let src = TempDir::new().unwrap();
        let a = write(src.path(), "a", b"abc");
        let archive = WarmArchive::new(src.path().join("wb.sdma"));

        for bad in ["../a", "dir/a", "dir\\a", ""] {
            assert!(matches!(
                archive.pack(&[(bad, &a)]),
                Err(DmError::Archive { .. })
            ));
        }
        assert!(!archive.path().exists());
    }

    #[test]
    fn test_rejects_bad_magic() {
        let src = TempDir::new().unwrap();
        let path = write(src.path(), "wb.sdma", b"NOPE\x00\x00\x00\x01\x00\x00\x00\x00");
        let archive = WarmArchive::new(path);
        assert!(matches!(archive.list(), Err(DmError::Archive { .. })));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let src = TempDir::new().unwrap();
        let path = write(src.path(), "wb.sdma", b"SDMA\x00\x00\x00\x09\x00\x00\x00\x00");
        let archive = WarmArchive::new(path);
        assert!(matches!(archive.list(), Err(DmError::Archive { .. })));
    }

    #[test]
    fn test_overstated_member_count() {
        let src = TempDir::new().unwrap();
        let mut bytes = b"SDMA\x00\x00\x00\x01\xff\xff\xff\xff".to_vec();
        bytes.extend(zstd::stream::encode_all(&[][..], COMPRESSION_LEVEL).unwrap());
        let path = write(src.path(), "wb.sdma", &bytes);

        let archive = WarmArchive::new(path);
        assert!(matches!(archive.list(), Err(DmError::Io(_))));
        let dest = TempDir::new().unwrap();
        assert!(archive.unpack(dest.path()).is_err());
    }

    #[test]
    fn test_missing_source_file() {
        let src = TempDir::new().unwrap();
        let archive = WarmArchive::new(src.path().join("wb.sdma"));
        let missing = src.path().join("missing");
        assert!(matches!(
            archive.pack(&[("missing", &missing)]),
            Err(DmError::Io(_))
        ));
    }
}
