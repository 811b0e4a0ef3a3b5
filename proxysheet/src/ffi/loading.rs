//! Background loading entry points.

use super::types::{PsBackgroundProgress, PsResolvedCard};
use super::{engine, guard, status_of, write_out};
use crate::error::Status;
use crate::loader::TaskHandle;

/// Start loading the images of `cards` and return at once.
///
/// The handle written to `out_handle` is never `0`.
///
/// # Safety
///
/// `cards` must point to `count` valid resolved cards; `out_handle` must be
/// valid for writes.
#[no_mangle]
pub unsafe extern "C" fn proxysheet_start_background_loading(
    cards: *const PsResolvedCard,
    count: usize,
    out_handle: *mut u64,
) -> i32 {
    guard("proxysheet_start_background_loading", || {
        if cards.is_null() || out_handle.is_null() {
            return Err(Status::NullPointer);
        }
        let cards = std::slice::from_raw_parts(cards, count)
            .iter()
            .map(|card| card.to_card())
            .collect::<Result<Vec<_>, _>>()?;

        let handle = engine()?.start_loading(cards).map_err(status_of)?;
        write_out(out_handle, handle.get());
        Ok(Status::Success.code())
    })
}

/// Snapshot a task's progress.
///
/// Writes `1` to `out_has_progress` and fills `out_progress` for a known
/// task; writes `0` and leaves `out_progress` untouched for an unknown one.
///
/// # Safety
///
/// Both out pointers must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn proxysheet_get_background_progress(
    handle: u64,
    out_progress: *mut PsBackgroundProgress,
    out_has_progress: *mut i32,
) -> i32 {
    guard("proxysheet_get_background_progress", || {
        if out_progress.is_null() || out_has_progress.is_null() {
            return Err(Status::NullPointer);
        }
        match engine()?.progress(TaskHandle::from(handle)) {
            Some(progress) => {
                write_out(out_progress, progress.into());
                write_out(out_has_progress, 1);
            }
            None => write_out(out_has_progress, 0),
        }
        Ok(Status::Success.code())
    })
}

/// Request cancellation. Returns once the request is recorded; poll
/// [`proxysheet_is_background_loading_finished`] to see the task stop.
#[no_mangle]
pub extern "C" fn proxysheet_cancel_background_loading(handle: u64) -> i32 {
    guard("proxysheet_cancel_background_loading", || {
        engine()?
            .cancel(TaskHandle::from(handle))
            .map_err(status_of)?;
        Ok(Status::Success.code())
    })
}

/// `1` when finished, `0` while running, `InvalidInput` for a handle that
/// was never issued or has already been observed as finished.
#[no_mangle]
pub extern "C" fn proxysheet_is_background_loading_finished(handle: u64) -> i32 {
    guard("proxysheet_is_background_loading_finished", || {
        let finished = engine()?
            .is_finished(TaskHandle::from(handle))
            .map_err(status_of)?;
        Ok(i32::from(finished))
    })
}
