//! FFI bindings for alert governance
//!
//! C-compatible functions for calling the engine from other languages. All
//! functions take null-terminated C strings carrying JSON and return allocated
//! strings that must be freed by the caller using `alertgov_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::sync::Arc;

use crate::baseline::{BaselineConfig, BaselineInput, BaselineService};
use crate::clock::SystemClock;
use crate::pipeline::{govern_alerts_json, AlertGovernor};
use crate::policy::{validate_alert_settings, PolicyConfig};
use crate::storage::MemoryStore;
use crate::types::AlertSettings;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

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

/// Required string argument; records an error naming `what` when invalid
unsafe fn required_arg(ptr: *const c_char, what: &str) -> Option<String> {
    let value = cstr_to_string(ptr);
    if value.is_none() {
        set_last_error(&format!("Invalid {} string pointer", what));
    }
    value
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

fn json_to_cstr<T: serde::Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Govern a JSON array of candidate alerts with a fresh in-memory engine.
///
/// # Safety
/// - `candidates_json` must be a valid null-terminated C string.
/// - `settings_json` may be NULL for default settings.
/// - Returns a newly allocated string that must be freed with `alertgov_free_string`.
/// - Returns NULL on error; call `alertgov_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn alertgov_govern(
    candidates_json: *const c_char,
    settings_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some(candidates) = required_arg(candidates_json, "candidates JSON") else {
        return ptr::null_mut();
    };
    let settings = cstr_to_string(settings_json);

    match govern_alerts_json(&candidates, settings.as_deref()) {
        Ok(report) => string_to_cstr(&report),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Validate and normalize alert settings; returns a `SettingsValidation` JSON.
///
/// # Safety
/// - `settings_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `alertgov_free_string`.
/// - Returns NULL on error; call `alertgov_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn alertgov_validate_settings(settings_json: *const c_char) -> *mut c_char {
    clear_last_error();

    let Some(json) = required_arg(settings_json, "settings JSON") else {
        return ptr::null_mut();
    };

    match serde_json::from_str::<AlertSettings>(&json) {
        Ok(settings) => json_to_cstr(&validate_alert_settings(&settings)),
        Err(e) => {
            set_last_error(&format!("Invalid JSON: {}", e));
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateful Engine API
// ============================================================================

/// Opaque handle bundling a governor and a baseline service over one in-memory store
pub struct AlertGovEngineHandle {
    governor: AlertGovernor,
    baselines: BaselineService,
}

/// Create an engine. `namespace` may be NULL for the default namespaces.
///
/// # Safety
/// - `namespace` must be NULL or a valid null-terminated C string.
/// - Must be freed with `alertgov_engine_free`.
#[no_mangle]
pub unsafe extern "C" fn alertgov_engine_new(namespace: *const c_char) -> *mut AlertGovEngineHandle {
    clear_last_error();

    let (policy_config, baseline_config) = match cstr_to_string(namespace) {
        Some(ns) if !ns.is_empty() => (
            PolicyConfig::with_namespace(format!("{}:policies", ns)),
            BaselineConfig::with_namespace(format!("{}:baselines", ns)),
        ),
        _ => (PolicyConfig::default(), BaselineConfig::default()),
    };

    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(SystemClock);
    let handle = Box::new(AlertGovEngineHandle {
        governor: AlertGovernor::with_config(policy_config, store.clone(), clock.clone()),
        baselines: BaselineService::new(baseline_config, store, clock),
    });
    Box::into_raw(handle)
}

/// Free an engine.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `alertgov_engine_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn alertgov_engine_free(engine: *mut AlertGovEngineHandle) {
    if !engine.is_null() {
        drop(Box::from_raw(engine));
    }
}

/// Govern candidates with persistent throttle/snooze/cap state.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `alertgov_engine_new`.
/// - `candidates_json` must be a valid null-terminated C string; `settings_json` may be NULL.
/// - Returns a newly allocated string that must be freed with `alertgov_free_string`.
/// - Returns NULL on error; call `alertgov_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn alertgov_engine_govern(
    engine: *mut AlertGovEngineHandle,
    candidates_json: *const c_char,
    settings_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &*engine;

    let Some(candidates) = required_arg(candidates_json, "candidates JSON") else {
        return ptr::null_mut();
    };
    let settings = cstr_to_string(settings_json);

    match handle.governor.govern_json(&candidates, settings.as_deref()) {
        Ok(report) => string_to_cstr(&report),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Snooze a dedupe key for `hours`.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `alertgov_engine_new`.
/// - `student_id` and `dedupe_key` must be valid null-terminated C strings.
/// - Returns 0 on success, -1 on error (including a non-positive duration).
#[no_mangle]
pub unsafe extern "C" fn alertgov_engine_snooze(
    engine: *mut AlertGovEngineHandle,
    student_id: *const c_char,
    dedupe_key: *const c_char,
    hours: f64,
) -> i32 {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return -1;
    }
    let handle = &*engine;

    let Some(student) = required_arg(student_id, "student_id") else {
        return -1;
    };
    let Some(key) = required_arg(dedupe_key, "dedupe_key") else {
        return -1;
    };

    match handle.governor.policies().snooze(&student, &key, hours) {
        Some(_) => 0,
        None => {
            set_last_error("Snooze duration must be a positive number of hours");
            -1
        }
    }
}

/// Whether a dedupe key is snoozed: 1 yes, 0 no, -1 on error.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `alertgov_engine_new`.
/// - `student_id` and `dedupe_key` must be valid null-terminated C strings.
#[no_mangle]
pub unsafe extern "C" fn alertgov_engine_is_snoozed(
    engine: *mut AlertGovEngineHandle,
    student_id: *const c_char,
    dedupe_key: *const c_char,
) -> i32 {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return -1;
    }
    let handle = &*engine;

    let Some(student) = required_arg(student_id, "student_id") else {
        return -1;
    };
    let Some(key) = required_arg(dedupe_key, "dedupe_key") else {
        return -1;
    };

    i32::from(handle.governor.policies().is_snoozed(&student, &key))
}

/// Most recent `limit` audit entries for a student as a JSON array.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `alertgov_engine_new`.
/// - `student_id` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `alertgov_free_string`.
#[no_mangle]
pub unsafe extern "C" fn alertgov_engine_audit_trail(
    engine: *mut AlertGovEngineHandle,
    student_id: *const c_char,
    limit: u32,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &*engine;

    let Some(student) = required_arg(student_id, "student_id") else {
        return ptr::null_mut();
    };

    let exported = handle
        .governor
        .policies()
        .export_audit_trail(&student, limit as usize);
    string_to_cstr(&exported)
}

/// Recompute a baseline from a `BaselineInput` JSON.
///
/// Returns the snapshot JSON, or the string `null` when there is not enough data.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `alertgov_engine_new`.
/// - `input_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `alertgov_free_string`.
/// - Returns NULL on error; call `alertgov_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn alertgov_engine_update_baseline(
    engine: *mut AlertGovEngineHandle,
    input_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &*engine;

    let Some(json) = required_arg(input_json, "baseline input JSON") else {
        return ptr::null_mut();
    };

    match BaselineInput::from_json(&json) {
        Ok(input) => json_to_cstr(&handle.baselines.update_baseline(&input)),
        Err(e) => {
            set_last_error(&format!("Invalid JSON: {}", e));
            ptr::null_mut()
        }
    }
}

/// Last persisted baseline for a student, or the string `null`.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `alertgov_engine_new`.
/// - `student_id` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `alertgov_free_string`.
#[no_mangle]
pub unsafe extern "C" fn alertgov_engine_get_baseline(
    engine: *mut AlertGovEngineHandle,
    student_id: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &*engine;

    let Some(student) = required_arg(student_id, "student_id") else {
        return ptr::null_mut();
    };

    json_to_cstr(&handle.baselines.get_baseline(&student))
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by alertgov functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by an alertgov function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn alertgov_free_string(ptr: *mut c_char) {
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
/// - The returned pointer is valid until the next alertgov function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn alertgov_last_error() -> *const c_char {
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
pub unsafe extern "C" fn alertgov_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    fn sample_candidates() -> CString {
        CString::new(
            r#"[{
                "id": "a-1",
                "student_id": "stu-1",
                "kind": "behavior_spike",
                "severity": "important",
                "confidence": 0.8,
                "created_at": "2024-01-15T09:00:00Z",
                "metadata": { "contextKey": "hall" }
            }, {
                "id": "a-2",
                "student_id": "stu-1",
                "kind": "behavior_spike",
                "severity": "moderate",
                "confidence": 0.6,
                "created_at": "2024-01-15T09:20:00Z",
                "metadata": { "contextKey": "hall" }
            }]"#,
        )
        .unwrap()
    }

    unsafe fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let s = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        alertgov_free_string(ptr);
        s
    }

    #[test]
    fn test_ffi_govern() {
        let candidates = sample_candidates();
        unsafe {
            let report = take_string(alertgov_govern(candidates.as_ptr(), ptr::null()));
            let value: serde_json::Value = serde_json::from_str(&report).unwrap();
            assert_eq!(value["duplicates_collapsed"], 1);
            assert_eq!(value["delivered"][0]["id"], "a-1");
        }
    }

    #[test]
    fn test_ffi_validate_settings() {
        let settings = CString::new(r#"{"daily_caps":{"low":-1}}"#).unwrap();
        unsafe {
            let result = take_string(alertgov_validate_settings(settings.as_ptr()));
            let value: serde_json::Value = serde_json::from_str(&result).unwrap();
            assert_eq!(value["is_valid"], false);
            assert_eq!(value["errors"].as_array().unwrap().len(), 1);
        }
    }

    #[test]
    fn test_ffi_engine_lifecycle() {
        unsafe {
            let ns = CString::new("tenant-a").unwrap();
            let engine = alertgov_engine_new(ns.as_ptr());
            assert!(!engine.is_null());

            let candidates = sample_candidates();
            let report = take_string(alertgov_engine_govern(engine, candidates.as_ptr(), ptr::null()));
            assert!(report.contains("\"delivered\""));

            let student = CString::new("stu-1").unwrap();
            let key = CString::new("stu-1|behavior_spike|hall").unwrap();
            assert_eq!(alertgov_engine_is_snoozed(engine, student.as_ptr(), key.as_ptr()), 0);
            assert_eq!(alertgov_engine_snooze(engine, student.as_ptr(), key.as_ptr(), 1.0), 0);
            assert_eq!(alertgov_engine_is_snoozed(engine, student.as_ptr(), key.as_ptr()), 1);
            assert_eq!(alertgov_engine_snooze(engine, student.as_ptr(), key.as_ptr(), -1.0), -1);

            let trail = take_string(alertgov_engine_audit_trail(engine, student.as_ptr(), 10));
            let entries: serde_json::Value = serde_json::from_str(&trail).unwrap();
            assert_eq!(entries.as_array().unwrap().len(), 1);

            let baseline = take_string(alertgov_engine_get_baseline(engine, student.as_ptr()));
            assert_eq!(baseline, "null");

            let input = CString::new(r#"{"student_id":"stu-1"}"#).unwrap();
            let updated = take_string(alertgov_engine_update_baseline(engine, input.as_ptr()));
            assert_eq!(updated, "null");

            alertgov_engine_free(engine);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let invalid = CString::new("not json").unwrap();
            let result = alertgov_govern(invalid.as_ptr(), ptr::null());
            assert!(result.is_null());

            let error = alertgov_last_error();
            assert!(!error.is_null());
            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(error_str.starts_with("Invalid JSON"));

            let result = alertgov_engine_govern(ptr::null_mut(), invalid.as_ptr(), ptr::null());
            assert!(result.is_null());
            let error_str = CStr::from_ptr(alertgov_last_error()).to_str().unwrap();
            assert_eq!(error_str, "Null engine pointer");
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = alertgov_version();
            assert!(!version.is_null());

            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert_eq!(version_str, env!("CARGO_PKG_VERSION"));
        }
    }
}
