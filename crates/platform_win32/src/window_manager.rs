//! Win32 window manager.

use crate::{decode_utf16, format_file_version, process_name, PlatformConfig};
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};
use vdesk_core::{Placement, PlatformError, ProcessInfo, WindowHandle, WindowId, WindowManager};
use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::{
    CloseHandle, BOOL, ERROR_ACCESS_DENIED, HANDLE, HWND, LPARAM, STILL_ACTIVE, WPARAM,
};
use windows::Win32::Storage::FileSystem::{
    GetFileVersionInfoSizeW, GetFileVersionInfoW, VerQueryValueW, VS_FIXEDFILEINFO,
};
use windows::Win32::System::Threading::{
    GetExitCodeProcess, OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32,
    PROCESS_QUERY_LIMITED_INFORMATION,
};
use windows::Win32::UI::WindowsAndMessaging::{
    BeginDeferWindowPos, DeferWindowPos, EndDeferWindowPos, EnumWindows, GetClassNameW,
    GetForegroundWindow, GetTopWindow, GetWindow, GetWindowLongW, GetWindowTextW,
    GetWindowThreadProcessId, IsWindow, IsWindowVisible, SendMessageTimeoutW,
    SetForegroundWindow, GWL_EXSTYLE, GW_HWNDNEXT, HWND_TOP, SET_WINDOW_POS_FLAGS,
    SMTO_ABORTIFHUNG, SMTO_BLOCK, SWP_HIDEWINDOW, SWP_NOACTIVATE, SWP_NOMOVE, SWP_NOOWNERZORDER,
    SWP_NOSIZE, SWP_NOZORDER, SWP_SHOWWINDOW, WM_NULL, WS_EX_TOPMOST,
};

fn hwnd(window: WindowId) -> HWND {
    HWND(window as usize as *mut c_void)
}

fn window_id(hwnd: HWND) -> WindowId {
    hwnd.0 as usize as WindowId
}

/// Closes a process handle on drop.
struct ProcessHandle(HANDLE);

impl ProcessHandle {
    fn open(process_id: u32) -> Result<Self, PlatformError> {
        unsafe {
            OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, process_id)
                .map(ProcessHandle)
                .map_err(|e| {
                    if e.code() == ERROR_ACCESS_DENIED.to_hresult() {
                        PlatformError::AccessDenied(process_id)
                    } else {
                        PlatformError::ProcessNotFound(process_id)
                    }
                })
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

/// [`WindowManager`] backed by the Win32 API.
#[derive(Debug, Clone, Default)]
pub struct Win32WindowManager {
    config: PlatformConfig,
}

impl Win32WindowManager {
    pub fn new(config: PlatformConfig) -> Self {
        Self { config }
    }

    fn timeout_ms(&self) -> u32 {
        u32::try_from(self.config.reposition_timeout.as_millis()).unwrap_or(u32::MAX)
    }

    /// Ping every window with WM_NULL in parallel. A window that does not
    /// answer within the timeout is reported as unresponsive.
    fn probe(&self, windows: &[WindowId]) -> Vec<WindowId> {
        let timeout = self.timeout_ms();
        std::thread::scope(|scope| {
            let probes: Vec<_> = windows
                .iter()
                .map(|window| {
                    let window = *window;
                    scope.spawn(move || {
                        let mut result = 0usize;
                        let answered = unsafe {
                            SendMessageTimeoutW(
                                hwnd(window),
                                WM_NULL,
                                WPARAM(0),
                                LPARAM(0),
                                SMTO_ABORTIFHUNG | SMTO_BLOCK,
                                timeout,
                                Some(&mut result),
                            )
                        };
                        (window, answered.0 != 0)
                    })
                })
                .collect();

            probes
                .into_iter()
                .filter_map(|probe| match probe.join() {
                    Ok((_, true)) => None,
                    Ok((window, false)) => Some(window),
                    Err(_) => None,
                })
                .collect()
        })
    }

    fn file_version(path: &Path) -> Option<String> {
        let wide: Vec<u16> = path
            .as_os_str()
            .to_string_lossy()
            .encode_utf16()
            .chain(std::iter::once(0))
            .collect();
        let name = PCWSTR(wide.as_ptr());

        unsafe {
            let size = GetFileVersionInfoSizeW(name, None);
            if size == 0 {
                return None;
            }
            let mut data = vec![0u8; size as usize];
            GetFileVersionInfoW(name, None, size, data.as_mut_ptr() as *mut c_void).ok()?;

            let root: Vec<u16> = "\\\0".encode_utf16().collect();
            let mut info: *mut c_void = std::ptr::null_mut();
            let mut len = 0u32;
            let found = VerQueryValueW(
                data.as_ptr() as *const c_void,
                PCWSTR(root.as_ptr()),
                &mut info,
                &mut len,
            );
            if !found.as_bool() || info.is_null() {
                return None;
            }
            let fixed = &*(info as *const VS_FIXEDFILEINFO);
            Some(format_file_version(fixed.dwFileVersionMS, fixed.dwFileVersionLS))
        }
    }
}

unsafe extern "system" fn collect_window(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let windows = &mut *(lparam.0 as *mut Vec<HWND>);
    windows.push(hwnd);
    BOOL(1)
}

impl WindowManager for Win32WindowManager {
    fn enumerate_top_level_windows(&self) -> Result<Vec<WindowHandle>, PlatformError> {
        let mut hwnds: Vec<HWND> = Vec::new();
        unsafe {
            EnumWindows(
                Some(collect_window),
                LPARAM(&mut hwnds as *mut Vec<HWND> as isize),
            )
            .map_err(|e| PlatformError::EnumerationFailed(e.to_string()))?;
        }

        let handles = hwnds
            .into_iter()
            .map(|hwnd| unsafe {
                let mut class = [0u16; 256];
                let class_len = GetClassNameW(hwnd, &mut class);
                let mut title = [0u16; 512];
                let title_len = GetWindowTextW(hwnd, &mut title);
                let mut pid = 0u32;
                GetWindowThreadProcessId(hwnd, Some(&mut pid));

                WindowHandle::new(
                    window_id(hwnd),
                    decode_utf16(&class, class_len.max(0) as usize),
                    decode_utf16(&title, title_len.max(0) as usize),
                    (pid != 0).then_some(pid),
                )
            })
            .collect::<Vec<_>>();

        trace!(count = handles.len(), "Enumerated top-level windows");
        Ok(handles)
    }

    fn top_window(&self) -> Option<WindowId> {
        unsafe { GetTopWindow(None).ok().map(window_id) }
    }

    fn window_below(&self, window: WindowId) -> Option<WindowId> {
        unsafe { GetWindow(hwnd(window), GW_HWNDNEXT).ok().map(window_id) }
    }

    fn reposition(
        &self,
        placements: &[Placement],
        preserve_order: bool,
    ) -> Result<Vec<WindowId>, PlatformError> {
        let live: Vec<&Placement> = placements
            .iter()
            .filter(|p| !self.is_destroyed(p.window))
            .collect();
        let targets: Vec<WindowId> = live.iter().map(|p| p.window).collect();
        let unresponsive = self.probe(&targets);

        let batch: Vec<&Placement> = live
            .into_iter()
            .filter(|p| !unresponsive.contains(&p.window))
            .collect();
        if batch.is_empty() {
            return Ok(unresponsive);
        }

        unsafe {
            let mut hdwp = BeginDeferWindowPos(batch.len() as i32)
                .map_err(|e| PlatformError::RepositionFailed(e.to_string()))?;

            let mut insert_after = HWND_TOP;
            for placement in &batch {
                let mut flags: SET_WINDOW_POS_FLAGS =
                    SWP_NOMOVE | SWP_NOSIZE | SWP_NOACTIVATE | SWP_NOOWNERZORDER;
                flags |= if placement.visible {
                    SWP_SHOWWINDOW
                } else {
                    SWP_HIDEWINDOW
                };
                if !preserve_order {
                    flags |= SWP_NOZORDER;
                }

                let target = hwnd(placement.window);
                hdwp = DeferWindowPos(hdwp, target, Some(insert_after), 0, 0, 0, 0, flags)
                    .map_err(|e| PlatformError::RepositionFailed(e.to_string()))?;
                insert_after = target;
            }

            EndDeferWindowPos(hdwp).map_err(|e| PlatformError::RepositionFailed(e.to_string()))?;
        }

        debug!(
            count = batch.len(),
            unresponsive = unresponsive.len(),
            preserve_order,
            "Repositioned windows"
        );
        Ok(unresponsive)
    }

    fn set_foreground(&self, window: WindowId) -> bool {
        let accepted = unsafe { SetForegroundWindow(hwnd(window)).as_bool() };
        if !accepted {
            warn!(window, "SetForegroundWindow refused");
        }
        accepted
    }

    fn foreground_window(&self) -> Option<WindowId> {
        let hwnd = unsafe { GetForegroundWindow() };
        (!hwnd.is_invalid()).then(|| window_id(hwnd))
    }

    fn is_destroyed(&self, window: WindowId) -> bool {
        unsafe { !IsWindow(Some(hwnd(window))).as_bool() }
    }

    fn is_visible(&self, window: WindowId) -> bool {
        unsafe { IsWindowVisible(hwnd(window)).as_bool() }
    }

    fn is_topmost(&self, window: WindowId) -> bool {
        let style = unsafe { GetWindowLongW(hwnd(window), GWL_EXSTYLE) } as u32;
        style & WS_EX_TOPMOST.0 != 0
    }

    fn process_info(&self, process_id: u32) -> Result<ProcessInfo, PlatformError> {
        let handle = ProcessHandle::open(process_id)?;

        let mut buffer = [0u16; 1024];
        let mut len = buffer.len() as u32;
        unsafe {
            QueryFullProcessImageNameW(
                handle.0,
                PROCESS_NAME_WIN32,
                PWSTR(buffer.as_mut_ptr()),
                &mut len,
            )
            .map_err(|_| PlatformError::ProcessNotFound(process_id))?;
        }

        let path = PathBuf::from(decode_utf16(&buffer, len as usize));
        let version = Self::file_version(&path);
        Ok(ProcessInfo {
            id: process_id,
            name: process_name(&path),
            path,
            version,
        })
    }

    fn is_process_alive(&self, process_id: u32) -> bool {
        let Ok(handle) = ProcessHandle::open(process_id) else {
            return false;
        };
        let mut code = 0u32;
        unsafe {
            GetExitCodeProcess(handle.0, &mut code).is_ok() && code == STILL_ACTIVE.0 as u32
        }
    }
}
