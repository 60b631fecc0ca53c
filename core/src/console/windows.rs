//! Win32 implementation of the console capability.
//!
//! The server's own stdin/stdout are pipes (the MCP transport), so after
//! `AttachConsole` the standard handles still point at those pipes. Opening
//! `CONIN$` is the only way to reach the attached console's real input
//! buffer.

use windows_sys::Win32::Foundation::CloseHandle;
use windows_sys::Win32::Foundation::GENERIC_READ;
use windows_sys::Win32::Foundation::GENERIC_WRITE;
use windows_sys::Win32::Foundation::GetLastError;
use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::Foundation::INVALID_HANDLE_VALUE;
use windows_sys::Win32::Storage::FileSystem::CreateFileW;
use windows_sys::Win32::Storage::FileSystem::FILE_SHARE_READ;
use windows_sys::Win32::Storage::FileSystem::FILE_SHARE_WRITE;
use windows_sys::Win32::Storage::FileSystem::OPEN_EXISTING;
use windows_sys::Win32::System::Console::ATTACH_PARENT_PROCESS;
use windows_sys::Win32::System::Console::AttachConsole;
use windows_sys::Win32::System::Console::FreeConsole;
use windows_sys::Win32::System::Console::GetConsoleMode;
use windows_sys::Win32::System::Console::INPUT_RECORD;
use windows_sys::Win32::System::Console::INPUT_RECORD_0;
use windows_sys::Win32::System::Console::KEY_EVENT;
use windows_sys::Win32::System::Console::KEY_EVENT_RECORD;
use windows_sys::Win32::System::Console::KEY_EVENT_RECORD_0;
use windows_sys::Win32::System::Console::NUMLOCK_ON;
use windows_sys::Win32::System::Console::WriteConsoleInputW;

use super::ConsoleApi;
use crate::keyevents::KeyTransition;

pub(crate) struct WinConsoleApi;

impl ConsoleApi for WinConsoleApi {
    fn detach(&self) {
        // Fails when no console is attached, which is fine.
        unsafe {
            FreeConsole();
        }
    }

    fn attach_parent(&self) -> Result<(), String> {
        if unsafe { AttachConsole(ATTACH_PARENT_PROCESS) } == 0 {
            let error = unsafe { GetLastError() };
            return Err(format!(
                "AttachConsole(ATTACH_PARENT_PROCESS) failed (error {error}); parent process may not have a console"
            ));
        }
        Ok(())
    }

    fn open_input(&self) -> Result<isize, String> {
        let conin: Vec<u16> = "CONIN$\0".encode_utf16().collect();
        let handle = unsafe {
            CreateFileW(
                conin.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                std::ptr::null(),
                OPEN_EXISTING,
                0,
                std::ptr::null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            let error = unsafe { GetLastError() };
            return Err(format!("CreateFileW(\"CONIN$\") failed (error {error})"));
        }
        Ok(handle as isize)
    }

    fn validate(&self, raw: isize) -> Result<Option<String>, String> {
        let mut mode: u32 = 0;
        if unsafe { GetConsoleMode(raw as HANDLE, &mut mode) } == 0 {
            let error = unsafe { GetLastError() };
            return Err(format!(
                "GetConsoleMode on CONIN$ failed (error {error}); not a real console"
            ));
        }
        Ok(Some(format!("0x{mode:04x}")))
    }

    fn close(&self, raw: isize) {
        unsafe {
            CloseHandle(raw as HANDLE);
        }
    }

    fn write(&self, raw: isize, events: &[KeyTransition]) -> Result<usize, String> {
        let records = build_records(events);
        let mut written: u32 = 0;
        let ok = unsafe {
            WriteConsoleInputW(
                raw as HANDLE,
                records.as_ptr(),
                records.len() as u32,
                &mut written,
            )
        };
        if ok == 0 {
            let error = unsafe { GetLastError() };
            return Err(format!("WriteConsoleInputW failed (error {error})"));
        }
        Ok(written as usize)
    }
}

fn build_records(events: &[KeyTransition]) -> Vec<INPUT_RECORD> {
    let mut records = Vec::with_capacity(events.len());
    for event in events {
        // Supplementary-plane characters become one record per UTF-16 unit.
        let mut units = [0u16; 2];
        for unit in event.ch.encode_utf16(&mut units) {
            records.push(key_record(event, *unit));
        }
    }
    records
}

fn key_record(event: &KeyTransition, unit: u16) -> INPUT_RECORD {
    INPUT_RECORD {
        EventType: KEY_EVENT as u16,
        Event: INPUT_RECORD_0 {
            KeyEvent: KEY_EVENT_RECORD {
                bKeyDown: i32::from(event.down),
                wRepeatCount: 1,
                wVirtualKeyCode: event.virtual_key,
                wVirtualScanCode: event.scan_code,
                uChar: KEY_EVENT_RECORD_0 { UnicodeChar: unit },
                dwControlKeyState: NUMLOCK_ON,
            },
        },
    }
}
