//! System-wide size limits.

/// The size of a memory page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// The maximum number of open file descriptors per task.
pub const OPEN_MAX: usize = 256;

/// The maximum size in bytes of the argv/envp buffer passed to `execve`.
pub const ARG_MAX: usize = PAGE_SIZE;

/// The maximum length of a path.
pub const PATH_MAX: usize = 4096;

/// The maximum length of a single path component.
pub const NAME_MAX: usize = 255;

/// The maximum length of a canonical-mode TTY input line.
pub const MAX_CANON: usize = 1024;
