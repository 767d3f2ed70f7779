//! Filename and path handling.

/// Various filename related errors that can occur.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone)]
pub enum FilenameError {
    /// Tried to create a file with an invalid character.
    InvalidCharacter,
    /// Tried to create a file with no file name.
    FilenameEmpty,
    /// Given name was too long: over 8.3 for a short name, over 255
    /// UTF-16 code units for a long one.
    NameTooLong,
    /// Can't start a file with a period, or after 8 characters.
    MisplacedPeriod,
    /// Creating an entry under a long name needs a caller-chosen 8.3
    /// alias; see [`FileName::with_alias`].
    NeedsShortAlias,
}

/// An MS-DOS 8.3 filename.
///
/// ISO-8859-1 encoding is assumed. All lower-case is converted to
/// upper-case by default.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(PartialEq, Eq, Clone)]
pub struct ShortFileName {
    pub(crate) contents: [u8; Self::TOTAL_LEN],
}

impl ShortFileName {
    const BASE_LEN: usize = 8;
    const TOTAL_LEN: usize = 11;

    /// Get a short file name containing "..", which means "parent
    /// directory".
    pub const fn parent_dir() -> Self {
        Self {
            contents: *b"..         ",
        }
    }

    /// Get a short file name containing ".", which means "this directory".
    pub const fn this_dir() -> Self {
        Self {
            contents: *b".          ",
        }
    }

    /// Get base name (without extension) of the file.
    pub fn base_name(&self) -> &[u8] {
        Self::bytes_before_space(&self.contents[..Self::BASE_LEN])
    }

    /// Get extension of the file (without base name).
    pub fn extension(&self) -> &[u8] {
        Self::bytes_before_space(&self.contents[Self::BASE_LEN..])
    }

    fn bytes_before_space(bytes: &[u8]) -> &[u8] {
        bytes.split(|b| *b == b' ').next().unwrap_or(&[])
    }

    /// Create a new MS-DOS 8.3 space-padded file name as stored in the
    /// directory entry.
    pub fn create_from_str(name: &str) -> Result<ShortFileName, FilenameError> {
        let mut sfn = ShortFileName {
            contents: [b' '; Self::TOTAL_LEN],
        };

        // Special case `..`, which means "parent directory".
        if name == ".." {
            return Ok(ShortFileName::parent_dir());
        }

        // Special case `.` (or blank), which means "this directory".
        if name.is_empty() || name == "." {
            return Ok(ShortFileName::this_dir());
        }

        let mut idx = 0;
        let mut seen_dot = false;
        for ch in name.chars() {
            match ch {
                // Microsoft say these are the invalid characters
                '\u{0000}'..='\u{001F}'
                | '"'
                | '*'
                | '+'
                | ','
                | '/'
                | ':'
                | ';'
                | '<'
                | '='
                | '>'
                | '?'
                | '['
                | '\\'
                | ']'
                | ' '
                | '|' => {
                    return Err(FilenameError::InvalidCharacter);
                }
                x if x > '\u{00FF}' => {
                    // We only handle ISO-8859-1 which is Unicode Code
                    // Points \U+0000 to \U+00FF. This is above that.
                    return Err(FilenameError::InvalidCharacter);
                }
                '.' => {
                    // Denotes the start of the file extension
                    if (1..=Self::BASE_LEN).contains(&idx) {
                        idx = Self::BASE_LEN;
                        seen_dot = true;
                    } else {
                        return Err(FilenameError::MisplacedPeriod);
                    }
                }
                _ => {
                    let b = ch.to_ascii_uppercase() as u8;
                    if seen_dot {
                        if (Self::BASE_LEN..Self::TOTAL_LEN).contains(&idx) {
                            sfn.contents[idx] = b;
                        } else {
                            return Err(FilenameError::NameTooLong);
                        }
                    } else if idx < Self::BASE_LEN {
                        sfn.contents[idx] = b;
                    } else {
                        return Err(FilenameError::NameTooLong);
                    }
                    idx += 1;
                }
            }
        }
        if idx == 0 {
            return Err(FilenameError::FilenameEmpty);
        }
        Ok(sfn)
    }

    /// Get the long file name checksum for this short filename.
    pub fn csum(&self) -> u8 {
        crate::fat::lfn_checksum(&self.contents)
    }
}

impl core::fmt::Display for ShortFileName {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let mut printed = 0;
        for (i, &c) in self.contents.iter().enumerate() {
            if c != b' ' {
                if i == Self::BASE_LEN {
                    write!(f, ".")?;
                    printed += 1;
                }
                // converting a byte to a codepoint means you are assuming
                // ISO-8859-1 encoding, because that's how Unicode was
                // designed.
                write!(f, "{}", c as char)?;
                printed += 1;
            }
        }
        if let Some(mut width) = f.width() {
            if width > printed {
                width -= printed;
                for _ in 0..width {
                    write!(f, "{}", f.fill())?;
                }
            }
        }
        Ok(())
    }
}

impl core::fmt::Debug for ShortFileName {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "ShortFileName(\"{}\")", self)
    }
}

/// One component of a path: either a plain 8.3 name, or a long name with
/// an optional 8.3 alias.
///
/// A `FileName` built from a path gets a long name whenever the component
/// doesn't fit 8.3. Looking entries up works either way (8.3 names match
/// case-insensitively, long names case-sensitively against the long name
/// fragments on disk); *creating* an entry under a long name additionally
/// needs an alias from [`FileName::with_alias`], because this crate does
/// not generate `~1`-style aliases itself.
#[derive(Debug, Clone)]
pub struct FileName<'a> {
    pub(crate) sfn: Option<ShortFileName>,
    pub(crate) lfn: Option<&'a str>,
}

impl<'a> FileName<'a> {
    /// The most UTF-16 code units a long file name can hold.
    const MAX_LFN_UNITS: usize = 255;

    /// Interpret a single name (no separators).
    pub fn new(name: &'a str) -> Result<FileName<'a>, FilenameError> {
        match ShortFileName::create_from_str(name) {
            Ok(sfn) => Ok(FileName {
                sfn: Some(sfn),
                lfn: None,
            }),
            Err(e) => {
                Self::check_long_name(name).ok_or(e)?;
                Ok(FileName {
                    sfn: None,
                    lfn: Some(name),
                })
            }
        }
    }

    /// A long name plus the 8.3 alias to store alongside it.
    pub fn with_alias(alias: &str, long_name: &'a str) -> Result<FileName<'a>, FilenameError> {
        let sfn = ShortFileName::create_from_str(alias)?;
        Self::check_long_name(long_name).ok_or(FilenameError::InvalidCharacter)?;
        Ok(FileName {
            sfn: Some(sfn),
            lfn: Some(long_name),
        })
    }

    /// Check a long name for validity; None means invalid.
    fn check_long_name(name: &str) -> Option<()> {
        if name.is_empty() {
            return None;
        }
        let mut units = 0;
        for ch in name.chars() {
            match ch {
                '\u{0000}'..='\u{001F}' | '"' | '*' | '/' | ':' | '<' | '>' | '?' | '\\' | '|' => {
                    return None;
                }
                _ => {}
            }
            units += ch.len_utf16();
        }
        if units > Self::MAX_LFN_UNITS {
            return None;
        }
        Some(())
    }

    /// How many long file name slots this name needs on disk (zero for a
    /// plain 8.3 name).
    pub(crate) fn lfn_slots(&self) -> u32 {
        match self.lfn {
            Some(name) => name.encode_utf16().count().div_ceil(13) as u32,
            None => 0,
        }
    }
}

/// Is this byte a directory separator?
pub(crate) fn is_dir_separator(b: u8) -> bool {
    b == b'/'
}

/// Consume one name component from the front of `path`.
///
/// Returns the parsed component and the remainder of the path with any
/// trailing separators stripped; an empty remainder means the component
/// was the last one.
pub(crate) fn parse_path_component(path: &str) -> Result<(FileName, &str), FilenameError> {
    let (component, rest) = match path.find('/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => (path, ""),
    };
    let rest = rest.trim_start_matches('/');
    Ok((FileName::new(component)?, rest))
}

// ****************************************************************************
//
// Unit Tests
//
// ****************************************************************************

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn filename_no_extension() {
        let sfn = ShortFileName {
            contents: *b"HELLO      ",
        };
        assert_eq!(format!("{}", &sfn), "HELLO");
        assert_eq!(sfn, ShortFileName::create_from_str("HELLO").unwrap());
        assert_eq!(sfn, ShortFileName::create_from_str("hello").unwrap());
        assert_eq!(sfn, ShortFileName::create_from_str("HeLlO").unwrap());
        assert_eq!(sfn, ShortFileName::create_from_str("HELLO.").unwrap());
    }

    #[test]
    fn filename_extension() {
        let sfn = ShortFileName {
            contents: *b"HELLO   TXT",
        };
        assert_eq!(format!("{}", &sfn), "HELLO.TXT");
        assert_eq!(sfn, ShortFileName::create_from_str("HELLO.TXT").unwrap());
    }

    #[test]
    fn filename_get_extension() {
        let mut sfn = ShortFileName::create_from_str("hello.txt").unwrap();
        assert_eq!(sfn.extension(), "TXT".as_bytes());
        sfn = ShortFileName::create_from_str("hello").unwrap();
        assert_eq!(sfn.extension(), "".as_bytes());
        sfn = ShortFileName::create_from_str("hello.a").unwrap();
        assert_eq!(sfn.extension(), "A".as_bytes());
    }

    #[test]
    fn filename_fulllength() {
        let sfn = ShortFileName {
            contents: *b"12345678TXT",
        };
        assert_eq!(format!("{}", &sfn), "12345678.TXT");
        assert_eq!(sfn, ShortFileName::create_from_str("12345678.TXT").unwrap());
    }

    #[test]
    fn filename_empty() {
        assert_eq!(
            ShortFileName::create_from_str("").unwrap(),
            ShortFileName::this_dir()
        );
    }

    #[test]
    fn filename_bad() {
        assert!(ShortFileName::create_from_str(" ").is_err());
        assert!(ShortFileName::create_from_str("123456789").is_err());
        assert!(ShortFileName::create_from_str("12345678.ABCD").is_err());
    }

    #[test]
    fn long_names() {
        let name = FileName::new("long_name_example.txt").unwrap();
        assert!(name.sfn.is_none());
        assert_eq!(name.lfn, Some("long_name_example.txt"));
        assert_eq!(name.lfn_slots(), 2);

        let name = FileName::new("HELLO.TXT").unwrap();
        assert!(name.sfn.is_some());
        assert_eq!(name.lfn_slots(), 0);

        assert!(FileName::new("bad/name").is_err());
        assert!(FileName::new("bad\u{0001}name").is_err());

        let name = FileName::with_alias("LONG_N~1.TXT", "long_name_example.txt").unwrap();
        assert!(name.sfn.is_some());
        assert_eq!(name.lfn_slots(), 2);
    }

    #[test]
    fn path_components() {
        let (first, rest) = parse_path_component("A/B/C.TXT").unwrap();
        assert_eq!(first.sfn, Some(ShortFileName::create_from_str("A").unwrap()));
        assert_eq!(rest, "B/C.TXT");
        let (second, rest) = parse_path_component(rest).unwrap();
        assert_eq!(second.sfn, Some(ShortFileName::create_from_str("B").unwrap()));
        assert_eq!(rest, "C.TXT");
        let (last, rest) = parse_path_component(rest).unwrap();
        assert_eq!(
            last.sfn,
            Some(ShortFileName::create_from_str("C.TXT").unwrap())
        );
        assert_eq!(rest, "");

        // trailing and doubled separators collapse
        let (name, rest) = parse_path_component("DIR//SUB/").unwrap();
        assert_eq!(name.sfn, Some(ShortFileName::create_from_str("DIR").unwrap()));
        assert_eq!(rest, "SUB/");
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
