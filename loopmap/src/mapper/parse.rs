//! Device identifiers recovered from losetup / kpartx output.
//!
//! Both tools print free-form text. Only two token shapes are trusted:
//! `loop<N>` (the loop device index) and `loop<N>p<M>` (a partition of it).
//! A token that runs on into a longer name (`loop3.img`, `loop3-old/`, `loop3a`) is part of
//! a file name, not a device, and is skipped.
//! Absence is always an explicit [`ParseError`], never an empty string.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

static LOOP_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bloop(\d+)(?:p\d+)?(?P<tail>[./\-]\w|\w)?").expect("loop token regex is valid")
});
static PARTITION_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bloop(\d+)p(\d+)(?P<tail>[./\-]\w|\w)?").expect("partition token regex is valid")
});
static LOOP_DEVICE_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/dev/loop(\d+)$").expect("loop path regex is valid"));

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("no loop device token found in output: {output:?}")]
    NoLoopDevice { output: String },

    #[error("unexpected device path {found:?}, expected /dev/loop<N>")]
    UnexpectedDevice { found: String },
}

/// Kernel-assigned loop device number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct LoopIndex(pub u32);

impl LoopIndex {
    /// `<dev_dir>/loop<N>`
    pub fn flat_path(self, dev_dir: &Path) -> PathBuf {
        dev_dir.join(self.to_string())
    }

    /// `<dev_dir>/mapper/loop<N>`; a naming convention, the node itself may not exist.
    pub fn mapper_path(self, dev_dir: &Path) -> PathBuf {
        dev_dir.join("mapper").join(self.to_string())
    }

    /// `<dev_dir>/loop<N>p<M>`
    pub fn partition_flat_path(self, dev_dir: &Path, number: u32) -> PathBuf {
        dev_dir.join(format!("{}p{}", self, number))
    }

    /// `<dev_dir>/mapper/loop<N>p<M>`
    pub fn partition_mapper_path(self, dev_dir: &Path, number: u32) -> PathBuf {
        dev_dir.join("mapper").join(format!("{}p{}", self, number))
    }
}

impl fmt::Display for LoopIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loop{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PartitionToken {
    pub loop_index: LoopIndex,
    pub number: u32,
}

/// Result of scanning partition-aware attach output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionMapping {
    /// First `loop<N>` in output order.
    pub loop_index: LoopIndex,
    /// Partition numbers of `loop_index`, distinct, in output order.
    pub partitions: Vec<u32>,
    /// Partition tokens naming a different loop index; ignored but reported.
    pub foreign: Vec<PartitionToken>,
}

/// Scan `output` for the canonical loop index and its partitions.
pub fn parse_partition_mapping(output: &str) -> Result<PartitionMapping, ParseError> {
    let loop_index = LOOP_TOKEN
        .captures_iter(output)
        .filter(is_device_token)
        .filter_map(|c| c[1].parse::<u32>().ok())
        .map(LoopIndex)
        .next()
        .ok_or_else(|| ParseError::NoLoopDevice {
            output: output.trim().to_string(),
        })?;

    let mut partitions = Vec::new();
    let mut foreign = Vec::new();
    for caps in PARTITION_TOKEN.captures_iter(output).filter(is_device_token) {
        let (Ok(index), Ok(number)) = (caps[1].parse::<u32>(), caps[2].parse::<u32>()) else {
            continue;
        };
        let token = PartitionToken {
            loop_index: LoopIndex(index),
            number,
        };
        if token.loop_index == loop_index {
            if !partitions.contains(&number) {
                partitions.push(number);
            }
        } else if !foreign.contains(&token) {
            foreign.push(token);
        }
    }

    Ok(PartitionMapping {
        loop_index,
        partitions,
        foreign,
    })
}

fn is_device_token(caps: &Captures<'_>) -> bool {
    caps.name("tail").is_none()
}

/// Parse the device path printed by `losetup --find --show`.
///
/// The last non-empty line must be exactly `/dev/loop<N>`.
pub fn parse_attached_device(stdout: &str) -> Result<(PathBuf, LoopIndex), ParseError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .ok_or_else(|| ParseError::NoLoopDevice {
            output: stdout.trim().to_string(),
        })?;

    let index = LOOP_DEVICE_PATH
        .captures(line)
        .and_then(|c| c[1].parse::<u32>().ok())
        .ok_or_else(|| ParseError::UnexpectedDevice {
            found: line.to_string(),
        })?;

    Ok((PathBuf::from(line), LoopIndex(index)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KPARTX_TWO_PARTS: &str = "\
add map loop7p1 (253:0): 0 1048576 linear 7:7 2048
add map loop7p2 (253:1): 0 7337984 linear 7:7 1050624
";

    #[test]
    fn extracts_index_and_partitions_in_order() {
        let m = parse_partition_mapping(KPARTX_TWO_PARTS).unwrap();
        assert_eq!(m.loop_index, LoopIndex(7));
        assert_eq!(m.partitions, vec![1, 2]);
        assert!(m.foreign.is_empty());
    }

    #[test]
    fn bare_tokens_on_one_line() {
        let m = parse_partition_mapping("loop7 loop7p1 loop7p2").unwrap();
        assert_eq!(m.loop_index, LoopIndex(7));
        assert_eq!(m.partitions, vec![1, 2]);
    }

    #[test]
    fn keeps_emitted_order_not_numeric_order() {
        let m = parse_partition_mapping("add map loop3p2 ...\nadd map loop3p1 ...").unwrap();
        assert_eq!(m.partitions, vec![2, 1]);
    }

    #[test]
    fn repeated_tokens_count_once() {
        let out = "add map loop2p1 (253:0)\n/dev/mapper/loop2p1 ready\nadd map loop2p2 (253:1)";
        let m = parse_partition_mapping(out).unwrap();
        assert_eq!(m.partitions, vec![1, 2]);
    }

    #[test]
    fn first_index_is_canonical() {
        let out = "add map loop4p1 (253:0)\nadd map loop9p1 (253:1)\nadd map loop4p2 (253:2)";
        let m = parse_partition_mapping(out).unwrap();
        assert_eq!(m.loop_index, LoopIndex(4));
        assert_eq!(m.partitions, vec![1, 2]);
        assert_eq!(
            m.foreign,
            vec![PartitionToken {
                loop_index: LoopIndex(9),
                number: 1
            }]
        );
    }

    #[test]
    fn index_without_partitions() {
        let m = parse_partition_mapping("loop deleted : /dev/loop12").unwrap();
        assert_eq!(m.loop_index, LoopIndex(12));
        assert!(m.partitions.is_empty());
    }

    #[test]
    fn tolerates_crlf_and_tabs() {
        let m = parse_partition_mapping("\r\n\tadd map loop5p1 (253:0)\r\n").unwrap();
        assert_eq!(m.loop_index, LoopIndex(5));
        assert_eq!(m.partitions, vec![1]);
    }

    #[test]
    fn missing_index_is_an_error() {
        for out in ["", "   \n", "read error, sector 0", "/dev/loop-control busy"] {
            assert!(
                matches!(
                    parse_partition_mapping(out),
                    Err(ParseError::NoLoopDevice { .. })
                ),
                "accepted {:?}",
                out
            );
        }
    }

    #[test]
    fn image_file_names_are_not_devices() {
        let out = "kpartx: /srv/loop3.img: warning\nadd map loop0p1 (253:0): 0 2048 linear 7:0 2048\n";
        let m = parse_partition_mapping(out).unwrap();
        assert_eq!(m.loop_index, LoopIndex(0));
        assert_eq!(m.partitions, vec![1]);
        assert!(m.foreign.is_empty());

        for out in [
            "/srv/loop3.img: read error",
            "/srv/loop3/disk.img missing",
            "cannot open loop3-backup",
            "loop3a is not a device",
            "/srv/loop0p1.img",
        ] {
            assert!(parse_partition_mapping(out).is_err(), "accepted {:?}", out);
        }
    }

    #[test]
    fn sentence_punctuation_keeps_the_token() {
        let m = parse_partition_mapping("attached loop6.\nadd map loop6p1: ok").unwrap();
        assert_eq!(m.loop_index, LoopIndex(6));
        assert_eq!(m.partitions, vec![1]);
    }

    #[test]
    fn embedded_word_is_not_a_token() {
        assert!(parse_partition_mapping("xloop3 something").is_err());
    }

    #[test]
    fn attached_device_from_losetup_show() {
        let (path, index) = parse_attached_device("/dev/loop14\n").unwrap();
        assert_eq!(path, PathBuf::from("/dev/loop14"));
        assert_eq!(index, LoopIndex(14));
    }

    #[test]
    fn attached_device_uses_last_line() {
        let (path, _) = parse_attached_device("\n/dev/loop1\n\n").unwrap();
        assert_eq!(path, PathBuf::from("/dev/loop1"));
    }

    #[test]
    fn attached_device_rejects_garbage() {
        assert!(matches!(
            parse_attached_device(""),
            Err(ParseError::NoLoopDevice { .. })
        ));
        assert!(matches!(
            parse_attached_device("/dev/sda\n"),
            Err(ParseError::UnexpectedDevice { .. })
        ));
        assert!(matches!(
            parse_attached_device("/dev/loop\n"),
            Err(ParseError::UnexpectedDevice { .. })
        ));
    }

    #[test]
    fn paths_follow_namespace_conventions() {
        let dev = Path::new("/dev");
        let idx = LoopIndex(7);
        assert_eq!(idx.flat_path(dev), PathBuf::from("/dev/loop7"));
        assert_eq!(idx.mapper_path(dev), PathBuf::from("/dev/mapper/loop7"));
        assert_eq!(
            idx.partition_flat_path(dev, 2),
            PathBuf::from("/dev/loop7p2")
        );
        assert_eq!(
            idx.partition_mapper_path(dev, 2),
            PathBuf::from("/dev/mapper/loop7p2")
        );
    }
}
