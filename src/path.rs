/// Hex-based DOM paths.
///
/// A path is a dotted sequence of 8-hex-digit segments such as
/// `10000000.20000000.30000000`. Siblings are minted by the transpiler with
/// a gap of 0x10000000 between neighbors, so later insertions pick a value
/// between two existing segments and no existing path ever has to be
/// renumbered. The engine validates path shape but never mints paths of its
/// own, except when instantiating loop templates under a known container.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Gap between consecutive sibling segments (~268M free slots).
pub const HEX_GAP: u32 = 0x1000_0000;

/// Number of hex digits in one segment.
pub const SEGMENT_WIDTH: usize = 8;

/// A dotted hex path identifying a node's position in the tree.
///
/// Validated paths use lowercase fixed-width segments, which makes plain
/// lexicographic order on the backing string identical to document order
/// (parents before children, siblings by ascending segment value). The
/// derived `Ord` relies on that invariant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HexPath(pub String);

impl HexPath {
    /// Empty anchor path. Only useful as a base for `child`; real nodes
    /// always carry at least one segment.
    pub fn root() -> Self {
        HexPath(String::new())
    }

    pub fn from_segments(segments: &[u32]) -> Self {
        let joined = segments
            .iter()
            .map(|seg| format!("{:08x}", seg))
            .collect::<Vec<_>>()
            .join(".");
        HexPath(joined)
    }

    /// Path of the n-th gap-aligned child under this path.
    pub fn child(&self, index: usize) -> Self {
        let segment = (index as u32 + 1).wrapping_mul(HEX_GAP);
        if self.0.is_empty() {
            HexPath(format!("{:08x}", segment))
        } else {
            HexPath(format!("{}.{:08x}", self.0, segment))
        }
    }

    /// Parent path, or `None` for the empty anchor.
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        match self.0.rfind('.') {
            Some(dot) => Some(HexPath(self.0[..dot].to_string())),
            None => Some(HexPath::root()),
        }
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        if self.0.is_empty() {
            0
        } else {
            self.0.bytes().filter(|&b| b == b'.').count() + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last segment value, if any.
    pub fn last_segment(&self) -> Option<u32> {
        if self.0.is_empty() {
            return None;
        }
        let tail = match self.0.rfind('.') {
            Some(dot) => &self.0[dot + 1..],
            None => &self.0,
        };
        u32::from_str_radix(tail, 16).ok()
    }

    /// All segment values, failing on malformed hex.
    pub fn segments(&self) -> Result<Vec<u32>, std::num::ParseIntError> {
        if self.0.is_empty() {
            return Ok(Vec::new());
        }
        self.0
            .split('.')
            .map(|seg| u32::from_str_radix(seg, 16))
            .collect()
    }

    /// Shape check: at least one segment, each exactly eight lowercase hex
    /// digits. Paths arrive from the transpiler through the host, so this
    /// runs on every validated tree.
    pub fn is_wellformed(&self) -> bool {
        if self.0.is_empty() {
            return false;
        }
        self.0.split('.').all(|seg| {
            seg.len() == SEGMENT_WIDTH
                && seg
                    .bytes()
                    .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        })
    }

    /// True when `self` is exactly one segment below `parent`.
    pub fn extends(&self, parent: &HexPath) -> bool {
        if parent.0.is_empty() {
            return !self.0.is_empty() && !self.0.contains('.');
        }
        self.0.len() == parent.0.len() + 1 + SEGMENT_WIDTH
            && self.0.starts_with(parent.0.as_str())
            && self.0.as_bytes()[parent.0.len()] == b'.'
    }
}

impl fmt::Display for HexPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for HexPath {
    fn from(s: String) -> Self {
        HexPath(s)
    }
}

impl From<&str> for HexPath {
    fn from(s: &str) -> Self {
        HexPath(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_paths_are_gapped() {
        let root = HexPath::root();
        assert_eq!(root.child(0).as_str(), "10000000");
        assert_eq!(root.child(1).as_str(), "20000000");
        assert_eq!(root.child(0).child(2).as_str(), "10000000.30000000");
    }

    #[test]
    fn parent_walks_up() {
        let path = HexPath::from("10000000.20000000.30000000");
        assert_eq!(path.parent().unwrap().as_str(), "10000000.20000000");
        assert_eq!(
            path.parent().unwrap().parent().unwrap().as_str(),
            "10000000"
        );
        assert!(HexPath::from("10000000").parent().unwrap().is_empty());
        assert!(HexPath::root().parent().is_none());
    }

    #[test]
    fn depth_counts_segments() {
        assert_eq!(HexPath::root().depth(), 0);
        assert_eq!(HexPath::from("10000000").depth(), 1);
        assert_eq!(HexPath::from("10000000.20000000").depth(), 2);
    }

    #[test]
    fn wellformed_rejects_bad_shapes() {
        assert!(HexPath::from("10000000.2fff0000").is_wellformed());
        assert!(!HexPath::from("").is_wellformed());
        assert!(!HexPath::from("1000000").is_wellformed());
        assert!(!HexPath::from("10000000.").is_wellformed());
        assert!(!HexPath::from("10000000.2FFF0000").is_wellformed());
        assert!(!HexPath::from("xyzw0000").is_wellformed());
    }

    #[test]
    fn extends_requires_exactly_one_segment() {
        let parent = HexPath::from("10000000");
        assert!(HexPath::from("10000000.20000000").extends(&parent));
        assert!(!HexPath::from("10000000").extends(&parent));
        assert!(!HexPath::from("10000000.20000000.30000000").extends(&parent));
        assert!(!HexPath::from("20000000.20000000").extends(&parent));
        assert!(HexPath::from("10000000").extends(&HexPath::root()));
    }

    #[test]
    fn lexicographic_order_is_document_order() {
        let mut paths = vec![
            HexPath::from("20000000"),
            HexPath::from("10000000.20000000"),
            HexPath::from("10000000"),
            HexPath::from("10000000.18000000"),
        ];
        paths.sort();
        let order: Vec<&str> = paths.iter().map(|p| p.as_str()).collect();
        assert_eq!(
            order,
            vec![
                "10000000",
                "10000000.18000000",
                "10000000.20000000",
                "20000000"
            ]
        );
    }

    #[test]
    fn gap_leaves_room_for_insertions() {
        let a = HexPath::from("10000000");
        let inserted = HexPath::from("18000000");
        let b = HexPath::from("20000000");
        assert!(a < inserted && inserted < b);
    }

    #[test]
    fn segments_round_trip() {
        let path = HexPath::from_segments(&[0x1000_0000, 0x2000_0000]);
        assert_eq!(path.segments().unwrap(), vec![0x1000_0000, 0x2000_0000]);
        assert_eq!(path.last_segment(), Some(0x2000_0000));
    }
}
