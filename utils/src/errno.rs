//! The kernel-wide error vocabulary.
//!
//! Every fallible operation above the raw allocator boundary returns [`EResult`]. Allocator
//! primitives (the buddy allocator and the slab caches) return [`AllocResult`] instead, since they
//! have no notion of most POSIX error codes; callers translate an [`AllocError`] into
//! [`Errno::ENOMEM`] exactly once, at the point where the failure is reported up to a syscall.

use core::fmt;

/// The allocator ran out of memory (or contiguous space) to satisfy a request.
///
/// Kept distinct from [`Errno`] because allocation failure is the only outcome a raw allocator
/// can report; translating it into a POSIX code is a decision made by its caller.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AllocError;

/// A POSIX error code.
///
/// Stored as the positive code; the syscall return convention negates it.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Errno(pub i32);

macro_rules! errno_consts {
	($($name:ident = $val:expr, $doc:literal;)*) => {
		impl Errno {
			$(
				#[doc = $doc]
				pub const $name: Errno = Errno($val);
			)*

			/// Returns the symbolic name of the error code, if known.
			pub fn name(self) -> &'static str {
				match self.0 {
					$($val => stringify!($name),)*
					_ => "UNKNOWN",
				}
			}
		}
	};
}

errno_consts! {
	EPERM = 1, "Operation not permitted.";
	ENOENT = 2, "No such file or directory.";
	ESRCH = 3, "No such process.";
	EINTR = 4, "Interrupted function call.";
	EIO = 5, "Input/output error.";
	ENXIO = 6, "No such device or address.";
	E2BIG = 7, "Argument list too long.";
	ENOEXEC = 8, "Exec format error.";
	EBADF = 9, "Bad file descriptor.";
	ECHILD = 10, "No child processes.";
	EAGAIN = 11, "Resource temporarily unavailable.";
	ENOMEM = 12, "Not enough space.";
	EACCES = 13, "Permission denied.";
	EFAULT = 14, "Bad address.";
	ENOTBLK = 15, "Block device required.";
	EBUSY = 16, "Device or resource busy.";
	EEXIST = 17, "File exists.";
	EXDEV = 18, "Improper link.";
	ENODEV = 19, "No such device.";
	ENOTDIR = 20, "Not a directory.";
	EISDIR = 21, "Is a directory.";
	EINVAL = 22, "Invalid argument.";
	ENFILE = 23, "Too many open files in system.";
	EMFILE = 24, "Too many open files.";
	ENOTTY = 25, "Inappropriate I/O control operation.";
	EFBIG = 27, "File too large.";
	ENOSPC = 28, "No space left on device.";
	ESPIPE = 29, "Invalid seek.";
	EROFS = 30, "Read-only filesystem.";
	EMLINK = 31, "Too many links.";
	EPIPE = 32, "Broken pipe.";
	ENAMETOOLONG = 36, "Filename too long.";
	ENOSYS = 38, "Function not implemented.";
	ENOTEMPTY = 39, "Directory not empty.";
	ERANGE = 34, "Result too large.";
}

impl fmt::Debug for Errno {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} ({})", self.name(), self.0)
	}
}

impl fmt::Display for Errno {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.name())
	}
}

impl From<AllocError> for Errno {
	fn from(_: AllocError) -> Self {
		Errno::ENOMEM
	}
}

/// Builds an [`Errno`] value from one of the named constants.
///
/// This exists purely so call sites read `errno!(ENOENT)` instead of `Errno::ENOENT`.
#[macro_export]
macro_rules! errno {
	($code:ident) => {
		$crate::errno::Errno::$code
	};
}

/// The result of an operation that can fail with a POSIX error code.
pub type EResult<T> = Result<T, Errno>;

/// The result of a low-level allocation that has no notion of POSIX error codes.
pub type AllocResult<T> = Result<T, AllocError>;
