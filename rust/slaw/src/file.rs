//! Binary slaw files
//!
//! An 8-byte header (`ff ff 0b 10`, version, type, 16-bit big-endian
//! flags) followed by encoded slawx back to back.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use tracing::{debug, error};

use crate::codec::{self, ByteOrder};
use crate::error::{Result, SlawError};
use crate::slaw::Slaw;
use crate::SLAW_VERSION as VERSION;

const MAGIC: [u8; 4] = [0xff, 0xff, 0x0b, 0x10];
const TYPE_SLAW: u8 = 1;
const FLAG_BIG_ENDIAN: u16 = 1;

fn header(order: ByteOrder) -> [u8; 8] {
    let flags = if order == ByteOrder::Big { FLAG_BIG_ENDIAN } else { 0 };
    let f = flags.to_be_bytes();
    [MAGIC[0], MAGIC[1], MAGIC[2], MAGIC[3], VERSION, TYPE_SLAW, f[0], f[1]]
}

/// Write `slawx` to a new file at `path` in native byte order
pub fn write_all_to_file(path: impl AsRef<Path>, slawx: &[Slaw]) -> Result<()> {
    let path = path.as_ref();
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(&header(ByteOrder::NATIVE))?;
    for s in slawx {
        out.write_all(&codec::encode(s))?;
    }
    out.flush()?;
    debug!(path = %path.display(), count = slawx.len(), "wrote slaw file");
    Ok(())
}

pub fn write_to_file(path: impl AsRef<Path>, slaw: &Slaw) -> Result<()> {
    write_all_to_file(path, std::slice::from_ref(slaw))
}

/// Every slaw in the file at `path`, in either byte order
pub fn read_all_from_file(path: impl AsRef<Path>) -> Result<Vec<Slaw>> {
    let path = path.as_ref();
    let mut contents = Vec::new();
    BufReader::new(File::open(path)?).read_to_end(&mut contents)?;
    if contents.len() < 8 || contents[..4] != MAGIC {
        error!(path = %path.display(), "not a binary slaw file");
        return Err(SlawError::corrupt(format!("{} is not a binary slaw file", path.display())));
    }
    if contents[4] != VERSION || contents[5] != TYPE_SLAW {
        return Err(SlawError::corrupt(format!(
            "unsupported slaw file version {} type {}",
            contents[4], contents[5]
        )));
    }
    let flags = u16::from_be_bytes([contents[6], contents[7]]);
    let order = if flags & FLAG_BIG_ENDIAN != 0 { ByteOrder::Big } else { ByteOrder::Little };

    let mut rest = &contents[8..];
    let mut slawx = Vec::new();
    while !rest.is_empty() {
        let (s, used) = codec::decode_prefix(rest, order)?;
        slawx.push(s);
        rest = &rest[used..];
    }
    Ok(slawx)
}

/// The first slaw in the file at `path`
pub fn read_from_file(path: impl AsRef<Path>) -> Result<Slaw> {
    let path = path.as_ref();
    read_all_from_file(path)?
        .into_iter()
        .next()
        .ok_or_else(|| SlawError::NotFound(format!("{} holds no slaw", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Protein;

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one.slaw");
        let s = Slaw::map([("name", Slaw::string("pool")), ("size", Slaw::from(1024u64))]);
        write_to_file(&path, &s).unwrap();
        assert_eq!(read_from_file(&path).unwrap(), s);

        let raw = std::fs::read(&path).unwrap();
        assert_eq!(&raw[..6], &[0xff, 0xff, 0x0b, 0x10, 2, 1]);
    }

    #[test]
    fn test_many_slawx() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("many.slaw");
        let all = vec![
            Slaw::Nil,
            Slaw::from(Protein::builder().descrip("d").rude(b"raw").build()),
            Slaw::string("a string longer than a wee one"),
        ];
        write_all_to_file(&path, &all).unwrap();
        assert_eq!(read_all_from_file(&path).unwrap(), all);
    }

    #[test]
    fn test_rejects_foreign_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("text.slaw");
        std::fs::write(&text, b"hello, world").unwrap();
        assert!(matches!(read_from_file(&text), Err(SlawError::CorruptSlaw(_))));

        let empty = dir.path().join("empty.slaw");
        write_all_to_file(&empty, &[]).unwrap();
        assert!(matches!(read_from_file(&empty), Err(SlawError::NotFound(_))));

        assert!(matches!(read_from_file(dir.path().join("missing")), Err(SlawError::Io(_))));
    }
}
