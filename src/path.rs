//! Path expressions.
//!
//! ```text
//! path      = image [":" partition] [":\" components]
//! image     = <host filesystem path>
//! partition = 1*DIGIT            ; zero-based virtual volume index
//! components = component *("\" component)
//! ```
//!
//! Examples: `game.img`, `game.img:\BIN\PIP.CMD`, `vichd.img:1:\`,
//! `vichd.img:0:\SUBDIR\*.COM`.

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    /// Host path of the image file.
    pub image: String,
    /// Zero-based partition index for Victor hard disks.
    pub partition: Option<usize>,
    /// Path components inside the volume; empty means the root.
    pub components: Vec<String>,
}

impl PathExpr {
    pub fn parse(path: &str) -> Result<Self> {
        if path.is_empty() {
            return Err(Error::NotFound(String::new()));
        }

        let (head, components) = match path.rfind(":\\") {
            Some(at) => {
                let tail = &path[at + 2..];
                let components = tail
                    .split('\\')
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect();
                (&path[..at], components)
            }
            None => (path, Vec::new()),
        };

        let (image, partition) = split_partition(head);
        if image.is_empty() {
            return Err(Error::NotFound(path.to_string()));
        }
        Ok(Self {
            image: image.to_string(),
            partition,
            components,
        })
    }

    pub fn component_refs(&self) -> Vec<&str> {
        self.components.iter().map(String::as_str).collect()
    }
}

/// Strip a trailing `:N` selector when N is all digits.
fn split_partition(head: &str) -> (&str, Option<usize>) {
    if let Some(colon) = head.rfind(':') {
        let digits = &head[colon + 1..];
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(index) = digits.parse() {
                return (&head[..colon], Some(index));
            }
        }
    }
    (head, None)
}
