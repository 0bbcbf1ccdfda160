//! Windows process discovery and memory access.

use super::host::{HostHandle, ProcessLocator};
use crate::error::{Error, Result};

/// Locates a host process by executable name through a ToolHelp snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsProcessLocator;

impl ProcessLocator for WindowsProcessLocator {
    fn locate(&self, name: &str) -> Result<Box<dyn HostHandle>> {
        let process = ProcessHandle::find_and_open(name)?;
        Ok(Box::new(process))
    }
}

#[cfg(target_os = "windows")]
pub use windows_impl::ProcessHandle;

#[cfg(not(target_os = "windows"))]
pub use fallback::ProcessHandle;

#[cfg(target_os = "windows")]
mod windows_impl {
    use std::ffi::c_void;

    use tracing::debug;
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::System::Diagnostics::Debug::{ReadProcessMemory, WriteProcessMemory};
    use windows::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, MODULEENTRY32W, Module32FirstW, PROCESSENTRY32W,
        Process32FirstW, Process32NextW, TH32CS_SNAPMODULE, TH32CS_SNAPMODULE32,
        TH32CS_SNAPPROCESS,
    };
    use windows::Win32::System::Threading::{
        OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_OPERATION, PROCESS_VM_READ,
        PROCESS_VM_WRITE,
    };

    use super::{Error, HostHandle, Result};

    /// Open handle to a host process with read/write access.
    pub struct ProcessHandle {
        handle: HANDLE,
        pub pid: u32,
        pub base_address: u32,
    }

    // SAFETY: a process HANDLE is a kernel object reference usable from any
    // thread; ReadProcessMemory/WriteProcessMemory are thread-safe.
    unsafe impl Send for ProcessHandle {}
    unsafe impl Sync for ProcessHandle {}

    impl ProcessHandle {
        pub fn find_and_open(name: &str) -> Result<Self> {
            let pid = find_process_id(name)?;
            Self::open(pid)
        }

        pub fn open(pid: u32) -> Result<Self> {
            let access =
                PROCESS_VM_READ | PROCESS_VM_WRITE | PROCESS_VM_OPERATION | PROCESS_QUERY_INFORMATION;
            // SAFETY: OpenProcess has no pointer arguments; the returned handle is owned here.
            let handle = unsafe { OpenProcess(access, false, pid) }
                .map_err(|e| Error::ProcessOpenFailed(format!("pid {}: {}", pid, e)))?;

            let base_address = match main_module_base(pid) {
                Ok(base) => base,
                Err(e) => {
                    // SAFETY: handle was returned by OpenProcess above.
                    let _ = unsafe { CloseHandle(handle) };
                    return Err(e);
                }
            };
            debug!("Opened process {} (base: {:#x})", pid, base_address);

            Ok(Self {
                handle,
                pid,
                base_address,
            })
        }
    }

    impl HostHandle for ProcessHandle {
        fn base_address(&self) -> u32 {
            self.base_address
        }

        fn read_into(&self, address: u32, buf: &mut [u8]) -> Result<usize> {
            if self.handle.is_invalid() {
                return Err(Error::NotAttached);
            }
            let mut read = 0usize;
            // SAFETY: buf is valid for buf.len() bytes; the OS validates the remote range.
            let result = unsafe {
                ReadProcessMemory(
                    self.handle,
                    address as usize as *const c_void,
                    buf.as_mut_ptr().cast(),
                    buf.len(),
                    Some(&mut read),
                )
            };
            // A failed call may still have copied a prefix; report what arrived.
            if result.is_err() && read == 0 {
                debug!("ReadProcessMemory failed at {:#x}: {:?}", address, result);
            }
            Ok(read)
        }

        fn write_from(&self, address: u32, bytes: &[u8]) -> Result<usize> {
            if self.handle.is_invalid() {
                return Err(Error::NotAttached);
            }
            let mut written = 0usize;
            // SAFETY: bytes is valid for bytes.len() bytes; the OS validates the remote range.
            let result = unsafe {
                WriteProcessMemory(
                    self.handle,
                    address as usize as *const c_void,
                    bytes.as_ptr().cast(),
                    bytes.len(),
                    Some(&mut written),
                )
            };
            if result.is_err() && written == 0 {
                debug!("WriteProcessMemory failed at {:#x}: {:?}", address, result);
            }
            Ok(written)
        }

        fn is_valid(&self) -> bool {
            !self.handle.is_invalid()
        }

        fn close(&mut self) {
            if !self.handle.is_invalid() {
                // SAFETY: handle is owned by this struct and closed exactly once.
                let _ = unsafe { CloseHandle(self.handle) };
                self.handle = HANDLE::default();
            }
        }
    }

    impl Drop for ProcessHandle {
        fn drop(&mut self) {
            self.close();
        }
    }

    fn wide_to_string(wide: &[u16]) -> String {
        let len = wide.iter().position(|&c| c == 0).unwrap_or(wide.len());
        String::from_utf16_lossy(&wide[..len])
    }

    fn find_process_id(name: &str) -> Result<u32> {
        // SAFETY: snapshot handle is closed before returning.
        unsafe {
            let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0)
                .map_err(|e| Error::ProcessNotFound(format!("{}: {}", name, e)))?;

            let mut entry = PROCESSENTRY32W {
                dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
                ..Default::default()
            };

            let mut found = None;
            if Process32FirstW(snapshot, &mut entry).is_ok() {
                loop {
                    if wide_to_string(&entry.szExeFile).eq_ignore_ascii_case(name) {
                        found = Some(entry.th32ProcessID);
                        break;
                    }
                    if Process32NextW(snapshot, &mut entry).is_err() {
                        break;
                    }
                }
            }
            let _ = CloseHandle(snapshot);

            found.ok_or_else(|| Error::ProcessNotFound(name.to_string()))
        }
    }

    fn main_module_base(pid: u32) -> Result<u32> {
        // SAFETY: snapshot handle is closed before returning.
        unsafe {
            let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPMODULE | TH32CS_SNAPMODULE32, pid)
                .map_err(|e| Error::ProcessOpenFailed(format!("module snapshot: {}", e)))?;

            let mut entry = MODULEENTRY32W {
                dwSize: std::mem::size_of::<MODULEENTRY32W>() as u32,
                ..Default::default()
            };
            let result = Module32FirstW(snapshot, &mut entry);
            let _ = CloseHandle(snapshot);

            result.map_err(|e| Error::ProcessOpenFailed(format!("main module: {}", e)))?;
            Ok(entry.modBaseAddr as usize as u32)
        }
    }
}

#[cfg(not(target_os = "windows"))]
mod fallback {
    use super::{Error, HostHandle, Result};

    /// Placeholder on targets without a process memory API.
    pub struct ProcessHandle {
        pub pid: u32,
        pub base_address: u32,
    }

    impl ProcessHandle {
        pub fn find_and_open(name: &str) -> Result<Self> {
            Err(Error::ProcessNotFound(format!(
                "{} (process access is only supported on Windows)",
                name
            )))
        }

        pub fn open(pid: u32) -> Result<Self> {
            Err(Error::ProcessOpenFailed(format!(
                "pid {} (process access is only supported on Windows)",
                pid
            )))
        }
    }

    impl HostHandle for ProcessHandle {
        fn base_address(&self) -> u32 {
            self.base_address
        }

        fn read_into(&self, _address: u32, _buf: &mut [u8]) -> Result<usize> {
            Err(Error::NotAttached)
        }

        fn write_from(&self, _address: u32, _bytes: &[u8]) -> Result<usize> {
            Err(Error::NotAttached)
        }

        fn is_valid(&self) -> bool {
            false
        }

        fn close(&mut self) {}
    }
}
