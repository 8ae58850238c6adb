//! In-memory execution of a serialized ELF image.
//!
//! The image is copied into a sealed memfd and handed to `fexecve` in a
//! forked child. A shared anonymous mapping carries a flag the child
//! sets when `fexecve` itself fails, which is the only way to tell a
//! failed exec apart from a program that exited with a low status code.

use std::ffi::CString;
use std::fmt;

use log::debug;

/// How an execution attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The file was executed; the exit code is meaningful.
    Success,
    /// The given arguments are invalid.
    ArgsError,
    /// `memfd_create` failed.
    MemfdError,
    /// The shared flag mapping failed.
    MmapError,
    /// Sealing the memfd failed.
    SealError,
    /// `fork` failed.
    ForkError,
    /// The child never reached the new program image.
    ExecError,
    /// `waitpid` failed.
    WaitError,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Success => "SUCCESS",
            RunStatus::ArgsError => "ARGS_ERROR",
            RunStatus::MemfdError => "MEMFD_ERROR",
            RunStatus::MmapError => "MMAP_ERROR",
            RunStatus::SealError => "SEAL_ERROR",
            RunStatus::ForkError => "FORK_ERROR",
            RunStatus::ExecError => "EXEC_ERROR",
            RunStatus::WaitError => "WAIT_ERROR",
        };
        f.write_str(name)
    }
}

/// Status plus the child's exit code when it actually ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunResult {
    pub status: RunStatus,
    pub code: i32,
}

impl RunResult {
    fn failed(status: RunStatus) -> RunResult {
        RunResult { status, code: 0 }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RunResult{{status={}, return={}}}", self.status, self.code)
    }
}

/// Execute an ELF image with the given argument strings, inheriting the
/// parent environment.
#[cfg(target_os = "linux")]
pub fn execute(image: &[u8], args: &[&str]) -> RunResult {
    if args.is_empty() {
        return RunResult::failed(RunStatus::ArgsError);
    }

    let Ok(args) = args
        .iter()
        .map(|arg| CString::new(*arg))
        .collect::<Result<Vec<_>, _>>()
    else {
        return RunResult::failed(RunStatus::ArgsError);
    };

    let Ok(env) = std::env::vars()
        .map(|(key, value)| CString::new(format!("{key}={value}")))
        .collect::<Result<Vec<_>, _>>()
    else {
        return RunResult::failed(RunStatus::ArgsError);
    };

    let mut argv: Vec<*const libc::c_char> = args.iter().map(|arg| arg.as_ptr()).collect();
    argv.push(std::ptr::null());
    let mut envp: Vec<*const libc::c_char> = env.iter().map(|var| var.as_ptr()).collect();
    envp.push(std::ptr::null());

    unsafe {
        let name = c"buffer";
        let memfd = libc::memfd_create(name.as_ptr(), libc::MFD_ALLOW_SEALING | libc::MFD_CLOEXEC);
        if memfd == -1 {
            return RunResult::failed(RunStatus::MemfdError);
        }

        // the child flips this when fexecve never took over
        let flag = libc::mmap(
            std::ptr::null_mut(),
            size_of::<libc::c_int>(),
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED | libc::MAP_ANONYMOUS,
            -1,
            0,
        );
        if flag == libc::MAP_FAILED {
            libc::close(memfd);
            return RunResult::failed(RunStatus::MmapError);
        }
        let flag = flag.cast::<libc::c_int>();
        *flag = 0;

        let mut written = 0;
        while written < image.len() {
            let count = libc::write(
                memfd,
                image[written..].as_ptr().cast(),
                image.len() - written,
            );
            if count < 0 {
                libc::close(memfd);
                return RunResult::failed(RunStatus::MemfdError);
            }
            written += count as usize;
        }

        if libc::fcntl(
            memfd,
            libc::F_ADD_SEALS,
            libc::F_SEAL_WRITE | libc::F_SEAL_GROW | libc::F_SEAL_SHRINK | libc::F_SEAL_SEAL,
        ) != 0
        {
            libc::close(memfd);
            return RunResult::failed(RunStatus::SealError);
        }

        debug!("executing {} byte image through memfd {memfd}", image.len());

        let pid = libc::fork();
        if pid == -1 {
            libc::close(memfd);
            return RunResult::failed(RunStatus::ForkError);
        }

        if pid == 0 {
            libc::fexecve(memfd, argv.as_ptr(), envp.as_ptr());

            // still here: exec failed, report through the shared flag
            *flag = 1;
            libc::_exit(1);
        }

        let mut status = 0;
        if libc::waitpid(pid, &mut status, 0) == -1 {
            libc::close(memfd);
            return RunResult::failed(RunStatus::WaitError);
        }

        libc::close(memfd);

        let exec_failed = *flag != 0;
        libc::munmap(flag.cast(), size_of::<libc::c_int>());

        if exec_failed {
            return RunResult::failed(RunStatus::ExecError);
        }

        RunResult {
            status: RunStatus::Success,
            code: libc::WEXITSTATUS(status),
        }
    }
}
