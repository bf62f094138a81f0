//! Depth-bounded, link-aware file tree walk over any [`VfsPath`] backend.
//!
//! ### Protocol
//! - A directory whose level is below the maximum depth is *entered*:
//!   `pre_visit_directory`, its children, then `post_visit_directory`.
//! - Files, and directories at the maximum depth, are *visited* with
//!   `visit_file`. A directory is never both entered and visited.
//! - `post_visit_directory` is only called for a directory whose
//!   `pre_visit_directory` returned [`Visit::Continue`].
//! - Children that vanish or cannot be listed are skipped silently; only
//!   errors returned by the visitor abort the walk.
//! - With `follow_links`, a directory that resolves to one of its own
//!   ancestors is skipped, so cyclic symlinks terminate even with
//!   [`Depth::Unbounded`].

use std::path::PathBuf;

use tracing::trace;

use crate::core::{Depth, FileVisitor, FsError, PathRef, Result, Visit};

enum Flow {
    Continue,
    SkipSiblings,
    Terminate,
}

struct Walker<'a> {
    depth: Depth,
    follow_links: bool,
    visitor: &'a mut dyn FileVisitor,
    ancestors: Vec<PathRef>,
}

/// Walks the tree rooted at `start`. Fails with [`FsError::NotFound`] if
/// `start` itself does not exist.
pub fn walk_file_tree(
    start: &PathRef,
    depth: Depth,
    follow_links: bool,
    visitor: &mut dyn FileVisitor,
) -> Result<()> {
    if !start.exists() && !start.is_link() {
        return Err(FsError::NotFound(PathBuf::from(start.path())));
    }
    let mut walker = Walker {
        depth,
        follow_links,
        visitor,
        ancestors: Vec::new(),
    };
    walker.walk(start, 0)?;
    Ok(())
}

impl Walker<'_> {
    fn is_dir(&self, path: &PathRef) -> bool {
        if self.follow_links {
            path.is_dir()
        } else {
            path.link_attributes().map(|a| a.is_dir()).unwrap_or(false)
        }
    }

    fn walk(&mut self, path: &PathRef, level: usize) -> Result<Flow> {
        if !self.is_dir(path) || !self.depth.allows(level) {
            return Ok(match self.visitor.visit_file(path)? {
                Visit::Continue => Flow::Continue,
                Visit::Skip => Flow::SkipSiblings,
                Visit::Terminate => Flow::Terminate,
            });
        }

        let real = if self.follow_links {
            path.real_path().ok()
        } else {
            None
        };
        if let Some(real) = &real {
            if self.ancestors.iter().any(|a| a == real) {
                trace!(path = %path.path(), "Skipping directory that loops back to an ancestor");
                return Ok(Flow::Continue);
            }
        }

        let children = match path.list() {
            Ok(children) => children,
            Err(e) => {
                trace!(path = %path.path(), error = %e, "Skipping unreadable directory");
                return Ok(Flow::Continue);
            }
        };

        match self.visitor.pre_visit_directory(path)? {
            Visit::Continue => {}
            Visit::Skip => return Ok(Flow::Continue),
            Visit::Terminate => return Ok(Flow::Terminate),
        }

        let pushed = real.is_some();
        if let Some(real) = real {
            self.ancestors.push(real);
        }
        let flow = self.walk_children(&children, level + 1);
        if pushed {
            self.ancestors.pop();
        }
        if let Flow::Terminate = flow? {
            return Ok(Flow::Terminate);
        }

        Ok(match self.visitor.post_visit_directory(path)? {
            Visit::Continue => Flow::Continue,
            Visit::Skip => Flow::SkipSiblings,
            Visit::Terminate => Flow::Terminate,
        })
    }

    fn walk_children(&mut self, children: &[PathRef], level: usize) -> Result<Flow> {
        for child in children {
            if !child.exists() && !child.is_link() {
                trace!(path = %child.path(), "Skipping vanished entry");
                continue;
            }
            match self.walk(child, level)? {
                Flow::Continue => {}
                Flow::SkipSiblings => break,
                Flow::Terminate => return Ok(Flow::Terminate),
            }
        }
        Ok(Flow::Continue)
    }
}
