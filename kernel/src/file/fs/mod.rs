/*
 * beeos - a small x86 Unix-like kernel core
 *
 * This file is part of beeos.
 */

//! Concrete filesystem implementations, each exposing [`super::vfs::Superblock`].

pub mod ext2;
