//! FFI bindings for Smart Detect
//!
//! This module provides C-compatible functions for driving the engine from a
//! host application. The host feeds replay records (see [`crate::input`]) as
//! JSON strings and receives the events each record produced as a JSON array.
//! All returned strings are allocated and must be freed by the caller using
//! `sd_free_string`.
//!
//! Sensor acquisition is owned by the host: engines created here start every
//! sensor as pending and expect an `acquisition` record once the platform
//! grants or denies access.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::rc::Rc;

use chrono::{DateTime, Utc};

use crate::bus::EventRecorder;
use crate::config::DetectionConfig;
use crate::engine::DetectionEngine;
use crate::error::DetectError;
use crate::input::ReplayRecord;
use crate::platform::SensorBackends;
use crate::store::{FileStore, KeyValueStore, MemoryStore};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last error message
fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clear the last error message
fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Return a JSON result as a C string, recording the error otherwise
fn json_result(result: Result<String, DetectError>) -> *mut c_char {
    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Engine API
// ============================================================================

/// Opaque handle to an engine and the events it has produced
pub struct SdEngineHandle {
    engine: DetectionEngine,
    recorder: EventRecorder,
}

impl SdEngineHandle {
    fn open(config_json: Option<String>, store_dir: Option<String>) -> Result<Self, DetectError> {
        let config = match config_json {
            Some(json) if !json.trim().is_empty() => DetectionConfig::from_json(&json)?,
            _ => DetectionConfig::default(),
        };
        let store: Rc<dyn KeyValueStore> = match store_dir {
            Some(dir) if !dir.trim().is_empty() => Rc::new(FileStore::open(dir)?),
            _ => Rc::new(MemoryStore::new()),
        };

        let mut engine = DetectionEngine::new(config, store, SensorBackends::deferred())?;
        let recorder = EventRecorder::new();
        engine.initialize(recorder.sink());
        Ok(Self { engine, recorder })
    }

    fn apply(&mut self, record_json: &str) -> Result<String, DetectError> {
        let record = ReplayRecord::from_json(record_json)?;
        let outcome = record.apply(&mut self.engine);
        // Drain even on failure so the next call starts clean
        let events = self.recorder.take();
        outcome?;
        Ok(serde_json::to_string(&events)?)
    }
}

/// Create a new engine.
///
/// # Safety
/// - `config_json` may be NULL (default configuration) or a valid null-terminated
///   C string holding a configuration document.
/// - `store_dir` may be NULL (in-memory store) or a valid null-terminated C string
///   naming a directory for persisted state.
/// - Returns NULL on error; call `sd_last_error` to get the error message.
/// - Free the engine with `sd_engine_free`.
#[no_mangle]
pub unsafe extern "C" fn sd_engine_new(
    config_json: *const c_char,
    store_dir: *const c_char,
) -> *mut SdEngineHandle {
    clear_last_error();

    match SdEngineHandle::open(cstr_to_string(config_json), cstr_to_string(store_dir)) {
        Ok(handle) => Box::into_raw(Box::new(handle)),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free an engine, releasing every sensor it holds.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `sd_engine_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn sd_engine_free(engine: *mut SdEngineHandle) {
    if !engine.is_null() {
        let mut handle = Box::from_raw(engine);
        handle.engine.shutdown();
    }
}

/// Apply one replay record and return the events it produced as a JSON array.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `sd_engine_new`.
/// - `record_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `sd_free_string`.
/// - Returns NULL on error; call `sd_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn sd_engine_apply(
    engine: *mut SdEngineHandle,
    record_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }

    let handle = &mut *engine;

    let record = match cstr_to_string(record_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid record string pointer");
            return ptr::null_mut();
        }
    };

    json_result(handle.apply(&record))
}

/// Status snapshot of every module as JSON.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `sd_engine_new`.
/// - `at` must be a valid null-terminated RFC 3339 timestamp.
/// - Returns a newly allocated string that must be freed with `sd_free_string`.
/// - Returns NULL on error; call `sd_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn sd_engine_status(
    engine: *mut SdEngineHandle,
    at: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }

    let handle = &*engine;

    let now = match cstr_to_string(at).map(|s| s.parse::<DateTime<Utc>>()) {
        Some(Ok(now)) => now,
        Some(Err(e)) => {
            set_last_error(&format!("Invalid timestamp: {}", e));
            return ptr::null_mut();
        }
        None => {
            set_last_error("Invalid timestamp string pointer");
            return ptr::null_mut();
        }
    };

    json_result(serde_json::to_string(&handle.engine.status(now)).map_err(DetectError::from))
}

/// Saved places as a JSON array.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `sd_engine_new`.
/// - Returns a newly allocated string that must be freed with `sd_free_string`.
/// - Returns NULL on error; call `sd_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn sd_engine_places(engine: *mut SdEngineHandle) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }

    let handle = &*engine;
    json_result(serde_json::to_string(&handle.engine.list_places()).map_err(DetectError::from))
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Smart Detect functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Smart Detect function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn sd_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Smart Detect call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn sd_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn sd_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    unsafe fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let s = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        sd_free_string(ptr);
        s
    }

    unsafe fn apply(engine: *mut SdEngineHandle, record: &str) -> serde_json::Value {
        let record = CString::new(record).unwrap();
        let json = take_string(sd_engine_apply(engine, record.as_ptr()));
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn test_ffi_engine_lifecycle() {
        unsafe {
            let engine = sd_engine_new(ptr::null(), ptr::null());
            assert!(!engine.is_null());

            // Sensors wait for the host to report acquisition
            let events = apply(
                engine,
                r#"{"at":"2024-05-01T08:00:00Z","type":"enable","module":"location"}"#,
            );
            assert_eq!(events, serde_json::json!([]));

            let events = apply(
                engine,
                r#"{"at":"2024-05-01T08:00:01Z","type":"acquisition","module":"location","granted":true}"#,
            );
            assert_eq!(events[0]["kind"], "location_started");

            apply(
                engine,
                r#"{"at":"2024-05-01T08:00:02Z","type":"position","lat":48.85,"lng":2.35}"#,
            );
            apply(
                engine,
                r#"{"at":"2024-05-01T08:00:03Z","type":"save_place","name":"Home","activity":"Wake Up"}"#,
            );

            let places: serde_json::Value =
                serde_json::from_str(&take_string(sd_engine_places(engine))).unwrap();
            assert_eq!(places[0]["name"], "Home");
            assert_eq!(places[0]["activity"], "Wake Up");

            let at = CString::new("2024-05-01T08:01:00Z").unwrap();
            let status: serde_json::Value =
                serde_json::from_str(&take_string(sd_engine_status(engine, at.as_ptr()))).unwrap();
            assert_eq!(status["location"]["current_place"], serde_json::Value::Null);
            assert_eq!(status["location"]["availability"]["status"], "active");

            sd_engine_free(engine);
        }
    }

    #[test]
    fn test_ffi_denied_acquisition() {
        unsafe {
            let engine = sd_engine_new(ptr::null(), ptr::null());
            apply(
                engine,
                r#"{"at":"2024-05-01T08:00:00Z","type":"enable","module":"noise"}"#,
            );
            let events = apply(
                engine,
                r#"{"at":"2024-05-01T08:00:01Z","type":"acquisition","module":"noise","granted":false,"reason":"Permission denied"}"#,
            );
            assert_eq!(events[0]["kind"], "noise_unavailable");
            assert_eq!(events[0]["reason"], "Permission denied");
            sd_engine_free(engine);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let engine = sd_engine_new(ptr::null(), ptr::null());
            let bad = CString::new("not json").unwrap();

            let result = sd_engine_apply(engine, bad.as_ptr());
            assert!(result.is_null());

            let error = sd_last_error();
            assert!(!error.is_null());
            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(!error_str.is_empty());

            sd_engine_free(engine);
        }
    }

    #[test]
    fn test_ffi_rejects_invalid_config() {
        unsafe {
            let config = CString::new(r#"{"motion": {"window_size": 0}}"#).unwrap();
            let engine = sd_engine_new(config.as_ptr(), ptr::null());
            assert!(engine.is_null());
            assert!(!sd_last_error().is_null());
        }
    }

    #[test]
    fn test_ffi_null_engine() {
        unsafe {
            let record = CString::new("{}").unwrap();
            assert!(sd_engine_apply(ptr::null_mut(), record.as_ptr()).is_null());
            assert!(sd_engine_places(ptr::null_mut()).is_null());
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = sd_version();
            assert!(!version.is_null());

            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert!(!version_str.is_empty());
        }
    }
}
