//! Flat C boundary.
//!
//! Every exported function:
//!
//! - rejects null required pointers with `NullPointer` and malformed UTF-8
//!   with `InvalidInput` before doing any work;
//! - returns `InitializationFailed` when no engine is running;
//! - catches panics so none unwinds into the caller;
//! - writes output pointers only on success.
//!
//! Buffers, strings and arrays returned to the caller are released with the
//! matching `proxysheet_free_*` function. Every free function accepts null.
//!
//! The engine lives in a process-wide slot set by [`proxysheet_initialize`]
//! and cleared by [`proxysheet_shutdown`]. Calls clone the `Arc` out of the
//! slot and release the lock before doing any work.

mod cards;
mod loading;
mod types;

pub use cards::*;
pub use loading::*;
pub use types::{
    PsBackgroundProgress, PsCacheStats, PsCardPrinting, PsDecklistEntry, PsImageCacheChange,
    PsImageCacheChangeArray, PsResolvedCard, PS_NONE,
};

use std::ffi::{c_char, c_void, CStr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::ptr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::cache::CacheKind;
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::{EngineError, Status};
use crate::logging::{init_logging, LogTargets};
use types::{
    build_array, bytes_into_raw, free_array, free_bytes, free_c_string, read_opt_str, read_str,
    to_c_string,
};

/// Key string passed to the observer callback on every wake.
pub const OBSERVER_KEY: &CStr = c"__PROXYSHEET_IMAGE_CACHE__";

/// Value returned by [`proxysheet_test_connection`].
pub const CONNECTION_CHECK: i32 = 42;

/// How long shutdown waits for in-flight calls to release the engine.
const SHUTDOWN_RECLAIM: Duration = Duration::from_secs(2);

/// Observer callback: `(context, key)`.
pub type ObserverCallback = extern "C" fn(context: *const c_void, key: *const c_char);

static ENGINE: RwLock<Option<Arc<Engine>>> = parking_lot::const_rwlock(None);

fn engine() -> Result<Arc<Engine>, Status> {
    ENGINE.read().clone().ok_or(Status::InitializationFailed)
}

/// Refuse calls that would wait on the runtime from one of its own threads,
/// such as an observer callback running on a worker.
fn outside_runtime(function: &'static str) -> Result<(), Status> {
    if tokio::runtime::Handle::try_current().is_ok() {
        warn!(function, "Blocking call refused on an engine worker thread");
        return Err(Status::InitializationFailed);
    }
    Ok(())
}

/// Take sole ownership of `shared` once every other clone is dropped,
/// giving up after `grace`.
fn reclaim<T>(mut shared: Arc<T>, grace: Duration) -> Result<T, Arc<T>> {
    let deadline = Instant::now() + grace;
    loop {
        match Arc::try_unwrap(shared) {
            Ok(owned) => return Ok(owned),
            Err(still_shared) if Instant::now() >= deadline => return Err(still_shared),
            Err(still_shared) => {
                shared = still_shared;
                thread::sleep(Duration::from_millis(10));
            }
        }
    }
}

/// Run `body`, mapping errors and panics to a status code.
fn guard(function: &'static str, body: impl FnOnce() -> Result<i32, Status>) -> i32 {
    guard_or(function, Status::InitializationFailed.code(), || {
        body().unwrap_or_else(Status::code)
    })
}

/// Run `body`, returning `fallback` if it panics.
fn guard_or<T>(function: &'static str, fallback: T, body: impl FnOnce() -> T) -> T {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(value) => value,
        Err(_) => {
            error!(function, "Panic caught at C boundary");
            fallback
        }
    }
}

fn status_of(error: EngineError) -> Status {
    let status = Status::from(&error);
    warn!(error = %error, code = status.code(), "Engine call failed");
    status
}

/// Write `value` through a non-null out pointer.
///
/// # Safety
///
/// `out` must be valid for writes.
unsafe fn write_out<T>(out: *mut T, value: T) {
    ptr::write(out, value);
}

// ---- lifecycle ----

/// Start the engine.
///
/// `cache_dir` may be null to use `PROXYSHEET_CACHE_DIR` or the platform
/// cache directory. Calling again while running is a no-op.
///
/// # Safety
///
/// `cache_dir` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn proxysheet_initialize(cache_dir: *const c_char) -> i32 {
    guard("proxysheet_initialize", || {
        let dir = read_opt_str(cache_dir)?;

        let mut slot = ENGINE.write();
        if slot.is_some() {
            return Ok(Status::Success.code());
        }

        let config = match dir {
            Some(dir) => EngineConfig::new(PathBuf::from(dir)),
            None => EngineConfig::from_env(),
        };
        init_logging(&config.log_dir(), config.log_filter.as_deref(), LogTargets::FILE)
            .map_err(status_of)?;

        let engine = Engine::start(config).map_err(status_of)?;
        info!(version = crate::VERSION, "Engine initialized over C boundary");
        *slot = Some(Arc::new(engine));
        Ok(Status::Success.code())
    })
}

/// Cancel background work, persist caches and stop the engine.
///
/// New calls fail with `InitializationFailed` immediately. Calls already
/// running on other threads get a short grace period to return; if one
/// outlasts it, loads are cancelled and caches saved here, and the runtime
/// stops when that call returns.
#[no_mangle]
pub extern "C" fn proxysheet_shutdown() -> i32 {
    guard("proxysheet_shutdown", || {
        outside_runtime("proxysheet_shutdown")?;
        let engine = ENGINE.write().take().ok_or(Status::InitializationFailed)?;
        match reclaim(engine, SHUTDOWN_RECLAIM) {
            Ok(engine) => engine.shutdown().map_err(status_of)?,
            Err(shared) => {
                warn!(
                    holders = Arc::strong_count(&shared) - 1,
                    grace_ms = SHUTDOWN_RECLAIM.as_millis() as u64,
                    "Engine still in use at shutdown, deferring runtime stop to last caller"
                );
                shared.cancel_all_loads();
                shared.unregister_observer();
                shared.save_caches().map_err(status_of)?;
            }
        }
        Ok(Status::Success.code())
    })
}

/// Liveness check for bindings. Always returns 42.
#[no_mangle]
pub extern "C" fn proxysheet_test_connection() -> i32 {
    CONNECTION_CHECK
}

/// Static description of a status code. Never free the result.
#[no_mangle]
pub extern "C" fn proxysheet_get_error_message(code: i32) -> *const c_char {
    Status::from_code(code)
        .map_or(c"Unknown error code", Status::message)
        .as_ptr()
}

// ---- caches ----

fn stats(function: &'static str, kind: CacheKind) -> PsCacheStats {
    guard_or(function, PsCacheStats::default(), || {
        engine()
            .map(|engine| PsCacheStats::from(engine.cache_stats(kind)))
            .unwrap_or_default()
    })
}

/// Image cache stats; zero when not initialized.
#[no_mangle]
pub extern "C" fn proxysheet_image_cache_stats() -> PsCacheStats {
    stats("proxysheet_image_cache_stats", CacheKind::Image)
}

/// Search cache stats; zero when not initialized.
#[no_mangle]
pub extern "C" fn proxysheet_search_cache_stats() -> PsCacheStats {
    stats("proxysheet_search_cache_stats", CacheKind::Search)
}

/// Names cache stats; zero when not initialized.
#[no_mangle]
pub extern "C" fn proxysheet_names_cache_stats() -> PsCacheStats {
    stats("proxysheet_names_cache_stats", CacheKind::Names)
}

fn clear(function: &'static str, kind: CacheKind) -> i32 {
    guard(function, || {
        engine()?.clear_cache(kind).map_err(status_of)?;
        Ok(Status::Success.code())
    })
}

#[no_mangle]
pub extern "C" fn proxysheet_clear_image_cache() -> i32 {
    clear("proxysheet_clear_image_cache", CacheKind::Image)
}

#[no_mangle]
pub extern "C" fn proxysheet_clear_search_cache() -> i32 {
    clear("proxysheet_clear_search_cache", CacheKind::Search)
}

/// Persist all three caches.
#[no_mangle]
pub extern "C" fn proxysheet_save_caches() -> i32 {
    guard("proxysheet_save_caches", || {
        engine()?.save_caches().map_err(status_of)?;
        Ok(Status::Success.code())
    })
}

/// Refetch the card name index. Blocks on the network.
#[no_mangle]
pub extern "C" fn proxysheet_update_card_names() -> i32 {
    guard("proxysheet_update_card_names", || {
        outside_runtime("proxysheet_update_card_names")?;
        engine()?.update_names().map_err(status_of)?;
        Ok(Status::Success.code())
    })
}

fn path(function: &'static str, kind: CacheKind) -> *mut c_char {
    guard_or(function, ptr::null_mut(), || {
        engine()
            .and_then(|engine| to_c_string(&engine.cache_path(kind).to_string_lossy()))
            .unwrap_or(ptr::null_mut())
    })
}

/// Image cache directory, or null when not initialized. Free with
/// [`proxysheet_free_string`].
#[no_mangle]
pub extern "C" fn proxysheet_get_image_cache_path() -> *mut c_char {
    path("proxysheet_get_image_cache_path", CacheKind::Image)
}

#[no_mangle]
pub extern "C" fn proxysheet_get_search_cache_path() -> *mut c_char {
    path("proxysheet_get_search_cache_path", CacheKind::Search)
}

#[no_mangle]
pub extern "C" fn proxysheet_get_names_cache_path() -> *mut c_char {
    path("proxysheet_get_names_cache_path", CacheKind::Names)
}

/// # Safety
///
/// `value` must be null or a string returned by this library, not yet freed.
#[no_mangle]
pub unsafe extern "C" fn proxysheet_free_string(value: *mut c_char) {
    let mut value = value;
    free_c_string(&mut value);
}

// ---- images ----

/// 1 if the image is cached, 0 if not, negative on error.
///
/// # Safety
///
/// `url` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn proxysheet_is_image_cached(url: *const c_char) -> i32 {
    guard("proxysheet_is_image_cached", || {
        let url = read_str(url)?;
        Ok(i32::from(engine()?.is_image_cached(url)))
    })
}

/// Copy a cached image into a new buffer. `InvalidInput` when not cached.
///
/// # Safety
///
/// `url` must be a valid NUL-terminated string; `out_data` and `out_len`
/// must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn proxysheet_get_cached_image_bytes(
    url: *const c_char,
    out_data: *mut *mut u8,
    out_len: *mut usize,
) -> i32 {
    guard("proxysheet_get_cached_image_bytes", || {
        if out_data.is_null() || out_len.is_null() {
            return Err(Status::NullPointer);
        }
        let url = read_str(url)?;
        let bytes = engine()?.cached_image(url).ok_or(Status::InvalidInput)?;
        let (data, len) = bytes_into_raw(&bytes)?;
        write_out(out_data, data);
        write_out(out_len, len);
        Ok(Status::Success.code())
    })
}

/// # Safety
///
/// `(data, len)` must come from [`proxysheet_get_cached_image_bytes`].
#[no_mangle]
pub unsafe extern "C" fn proxysheet_free_buffer(data: *mut u8, len: usize) {
    free_bytes(data, len);
}

// ---- change notification ----

/// Opaque caller identity handed back to the callback verbatim.
#[derive(Clone, Copy)]
struct ObserverContext(*const c_void);

// SAFETY: the pointer is never dereferenced here, only passed back to the
// caller's own callback.
unsafe impl Send for ObserverContext {}
unsafe impl Sync for ObserverContext {}

impl ObserverContext {
    fn get(self) -> *const c_void {
        self.0
    }
}

/// Install the observer woken when image cache changes are queued,
/// replacing any previous one. Wakes are coalesced; drain the changes with
/// [`proxysheet_poll_image_cache_changes`].
///
/// The callback may run on an engine worker thread. It may poll, free and
/// read cache state, but the calls that wait on the runtime
/// (search, resolve, name update, shutdown) fail there with
/// `InitializationFailed`.
///
/// # Safety
///
/// `context` must stay valid until the observer is unregistered or replaced,
/// and `callback` must be safe to call from any thread.
#[no_mangle]
pub unsafe extern "C" fn proxysheet_register_image_cache_observer(
    context: *const c_void,
    callback: Option<ObserverCallback>,
) -> i32 {
    guard("proxysheet_register_image_cache_observer", || {
        let callback = callback.ok_or(Status::NullPointer)?;
        if context.is_null() {
            return Err(Status::NullPointer);
        }
        let context = ObserverContext(context);
        engine()?.register_observer(Arc::new(move || {
            callback(context.get(), OBSERVER_KEY.as_ptr());
        }));
        Ok(Status::Success.code())
    })
}

/// Remove the observer. Succeeds whether or not one was installed.
#[no_mangle]
pub extern "C" fn proxysheet_unregister_image_cache_observer() -> i32 {
    guard("proxysheet_unregister_image_cache_observer", || {
        engine()?.unregister_observer();
        Ok(Status::Success.code())
    })
}

/// Drain queued image cache changes. Null when nothing is pending.
/// Free with [`proxysheet_free_image_cache_changes`].
///
/// If the changes cannot be handed out the result is null and they stay
/// queued for the next poll.
#[no_mangle]
pub extern "C" fn proxysheet_poll_image_cache_changes() -> *mut PsImageCacheChangeArray {
    guard_or("proxysheet_poll_image_cache_changes", ptr::null_mut(), || {
        let Ok(engine) = engine() else {
            return ptr::null_mut();
        };
        let polled: Result<_, Status> = engine.poll_changes_with(|changes| {
            if changes.is_empty() {
                return Ok(ptr::null_mut());
            }
            let (changes, count) = build_array(changes, PsImageCacheChange::from_change)?;
            Ok(Box::into_raw(Box::new(PsImageCacheChangeArray { changes, count })))
        });

        match polled {
            Ok(array) => array,
            Err(status) => {
                error!(
                    code = status.code(),
                    pending = engine.pending_changes(),
                    "Failed to hand out cache changes, keeping them queued"
                );
                ptr::null_mut()
            }
        }
    })
}

/// # Safety
///
/// `array` must be null or a pointer from
/// [`proxysheet_poll_image_cache_changes`], not yet freed.
#[no_mangle]
pub unsafe extern "C" fn proxysheet_free_image_cache_changes(array: *mut PsImageCacheChangeArray) {
    if array.is_null() {
        return;
    }
    let array = Box::from_raw(array);
    free_array(array.changes, array.count);
}


#[cfg(test)]
mod tests {
    use super::test_support::{session, uninitialized};
    use super::*;
    use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

    #[test]
    fn test_connection_and_messages() {
        assert_eq!(proxysheet_test_connection(), 42);
        for code in [0, -1, -2, -3, -4, -5, -6, 99] {
            let message = unsafe { CStr::from_ptr(proxysheet_get_error_message(code)) };
            assert!(!message.to_bytes().is_empty());
        }
    }

    #[test]
    fn test_reclaim_waits_for_released_clones() {
        let shared = Arc::new(7u32);
        let held = Arc::clone(&shared);
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            drop(held);
        });

        assert_eq!(reclaim(shared, Duration::from_secs(5)), Ok(7));
        releaser.join().unwrap();
    }

    #[test]
    fn test_reclaim_gives_up_after_grace() {
        let shared = Arc::new(7u32);
        let _held = Arc::clone(&shared);

        let started = Instant::now();
        let still_shared = reclaim(shared, Duration::from_millis(50)).unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(Arc::strong_count(&still_shared), 2);
    }

    #[test]
    fn test_shutdown_while_engine_is_held() {
        let _session = session();
        let held = engine().unwrap();
        held.register_observer(Arc::new(|| {}));
        held.search_printings("Lightning Bolt").unwrap();
        let search_file = held.config().search_cache_path();
        assert!(!search_file.exists());

        assert_eq!(proxysheet_shutdown(), Status::Success.code());
        assert_eq!(engine().err(), Some(Status::InitializationFailed));
        assert!(!held.has_observer());
        assert!(search_file.exists());

        // The holder finishes its call normally and the engine stops with it.
        assert!(held.search_printings("Lightning Bolt").is_ok());
        drop(held);
        assert_eq!(proxysheet_shutdown(), Status::InitializationFailed.code());
    }

    #[test]
    fn test_uninitialized_calls() {
        let _lock = uninitialized();
        assert_eq!(proxysheet_image_cache_stats(), PsCacheStats::default());
        assert_eq!(proxysheet_save_caches(), Status::InitializationFailed.code());
        assert_eq!(proxysheet_shutdown(), Status::InitializationFailed.code());
        assert!(proxysheet_get_image_cache_path().is_null());
        assert!(proxysheet_poll_image_cache_changes().is_null());
        let url = c"https://img.test/m10/bolt.jpg";
        assert_eq!(
            unsafe { proxysheet_is_image_cached(url.as_ptr()) },
            Status::InitializationFailed.code()
        );
    }

    #[test]
    fn test_null_pointers_rejected() {
        let _session = session();
        unsafe {
            assert_eq!(proxysheet_is_image_cached(ptr::null()), Status::NullPointer.code());
            let mut len = 0usize;
            assert_eq!(
                proxysheet_get_cached_image_bytes(c"x".as_ptr(), ptr::null_mut(), &mut len),
                Status::NullPointer.code()
            );
            assert_eq!(
                proxysheet_register_image_cache_observer(ptr::null(), None),
                Status::NullPointer.code()
            );
            proxysheet_free_string(ptr::null_mut());
            proxysheet_free_buffer(ptr::null_mut(), 0);
            proxysheet_free_image_cache_changes(ptr::null_mut());
        }
    }

    #[test]
    fn test_cache_paths_and_missing_image() {
        let session = session();

        let path = proxysheet_get_image_cache_path();
        let text = unsafe { CStr::from_ptr(path) }.to_str().unwrap().to_string();
        unsafe { proxysheet_free_string(path) };
        assert_eq!(PathBuf::from(text), session.dir.path().join("images"));

        let mut data = ptr::null_mut();
        let mut len = 0usize;
        let status = unsafe {
            proxysheet_get_cached_image_bytes(c"https://img.test/none.jpg".as_ptr(), &mut data, &mut len)
        };
        assert_eq!(status, Status::InvalidInput.code());
        assert!(data.is_null());
    }

    static WAKES: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn count_wake(context: *const c_void, key: *const c_char) {
        assert!(!context.is_null());
        let key = unsafe { CStr::from_ptr(key) };
        assert_eq!(key, OBSERVER_KEY);
        WAKES.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_observer_and_poll() {
        let _session = session();
        let token = 7u32;
        let status = unsafe {
            proxysheet_register_image_cache_observer(
                &token as *const u32 as *const c_void,
                Some(count_wake),
            )
        };
        assert_eq!(status, 0);

        let engine = engine().unwrap();
        let resolution = engine.parse_and_resolve("1 Lightning Bolt", crate::card::FaceMode::FrontOnly);
        let handle = engine.start_loading(resolution.cards).unwrap();
        while !engine.is_finished(handle).unwrap() {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(WAKES.load(Ordering::SeqCst) >= 1);

        let array = proxysheet_poll_image_cache_changes();
        assert!(!array.is_null());
        let changes = unsafe { std::slice::from_raw_parts((*array).changes, (*array).count) };
        assert_eq!(changes.len(), 3);
        assert!(changes.iter().all(|c| c.kind == 1 && !c.url.is_null()));
        unsafe { proxysheet_free_image_cache_changes(array) };

        assert!(proxysheet_poll_image_cache_changes().is_null());
        assert_eq!(proxysheet_unregister_image_cache_observer(), 0);
        assert_eq!(proxysheet_unregister_image_cache_observer(), 0);
    }

    static DRAINED_IN_WAKE: AtomicUsize = AtomicUsize::new(0);
    static SEARCH_IN_WAKE: AtomicI32 = AtomicI32::new(1);

    extern "C" fn poll_from_wake(_context: *const c_void, _key: *const c_char) {
        let array = proxysheet_poll_image_cache_changes();
        if !array.is_null() {
            DRAINED_IN_WAKE.fetch_add(unsafe { (*array).count }, Ordering::SeqCst);
            unsafe { proxysheet_free_image_cache_changes(array) };
        }

        let mut printings = ptr::null_mut();
        let mut count = 0usize;
        let status = unsafe {
            proxysheet_search_printings(c"Lightning Bolt".as_ptr(), &mut printings, &mut count)
        };
        if status == Status::Success.code() {
            unsafe { proxysheet_free_printings(printings, count) };
        }
        SEARCH_IN_WAKE.store(status, Ordering::SeqCst);
    }

    #[test]
    fn test_observer_may_poll_but_not_block() {
        let _session = session();
        let token = 3u32;
        let status = unsafe {
            proxysheet_register_image_cache_observer(
                &token as *const u32 as *const c_void,
                Some(poll_from_wake),
            )
        };
        assert_eq!(status, 0);

        let engine = engine().unwrap();
        wait_for_load(&engine, "1 Lightning Bolt");

        // Selected m10 plus alternatives lea and 2x2, all drained by the wake.
        assert_eq!(DRAINED_IN_WAKE.load(Ordering::SeqCst), 3);
        assert_eq!(SEARCH_IN_WAKE.load(Ordering::SeqCst), Status::InitializationFailed.code());
        assert!(proxysheet_poll_image_cache_changes().is_null());

        // The same call succeeds from an ordinary thread.
        let mut printings = ptr::null_mut();
        let mut count = 0usize;
        let status = unsafe {
            proxysheet_search_printings(c"Lightning Bolt".as_ptr(), &mut printings, &mut count)
        };
        assert_eq!(status, 0);
        unsafe { proxysheet_free_printings(printings, count) };
        assert_eq!(proxysheet_unregister_image_cache_observer(), 0);
    }

    fn wait_for_load(engine: &Engine, text: &str) {
        let resolution = engine.parse_and_resolve(text, crate::card::FaceMode::FrontOnly);
        let handle = engine.start_loading(resolution.cards).unwrap();
        while !engine.is_finished(handle).unwrap() {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
    }

    #[test]
    fn test_failed_poll_keeps_changes_queued() {
        let url = "https://img.test/bad\0name.jpg";
        let catalog = crate::catalog::mock::StaticCatalog::new().with_card(vec![
            crate::card::CardPrinting::single("Broken Relic", "xyz", "en", url),
        ]);
        let _session = test_support::session_with(catalog);
        let engine = engine().unwrap();
        wait_for_load(&engine, "1 Broken Relic");
        assert_eq!(engine.pending_changes(), 1);

        // The URL cannot cross as a C string, so nothing is handed out.
        assert!(proxysheet_poll_image_cache_changes().is_null());
        assert!(proxysheet_poll_image_cache_changes().is_null());

        let kept = engine.poll_changes();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].url, url);
    }
}
