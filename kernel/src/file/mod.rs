/*
 * beeos - a small x86 Unix-like kernel core
 *
 * This file is part of beeos.
 */

//! The file layer: a small VFS over one mounted filesystem, backed by a read-only ext2 reader.

pub mod fs;
pub mod vfs;
