//! `#[repr(C)]` shapes crossing the boundary and their ownership helpers.
//!
//! Every string field of an output struct is an individually owned
//! `CString` raw pointer. Arrays are boxed slices handed out as
//! `(pointer, count)` and returned through the matching free function, which
//! releases every contained string before the slice itself.

use std::ffi::{c_char, CStr, CString};
use std::mem::ManuallyDrop;
use std::ptr;

use crate::cache::CacheStats;
use crate::card::{BackKind, CardPrinting, DecklistEntry, FaceMode, ResolvedCard};
use crate::error::Status;
use crate::loader::LoadProgress;
use crate::notify::ImageCacheChange;

/// Sentinel for "absent" in optional integer fields.
pub const PS_NONE: i32 = -1;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PsCacheStats {
    pub count: u32,
    pub size_mb: f64,
}

impl From<CacheStats> for PsCacheStats {
    fn from(stats: CacheStats) -> Self {
        Self {
            count: stats.count,
            size_mb: stats.size_mb,
        }
    }
}

/// A tokenized decklist line. `set` and `language` may be null;
/// `face_mode` and `source_line` use `-1` for "absent".
#[repr(C)]
#[derive(Debug)]
pub struct PsDecklistEntry {
    pub quantity: u32,
    pub name: *mut c_char,
    pub set: *mut c_char,
    pub language: *mut c_char,
    pub face_mode: i32,
    pub source_line: i32,
}

#[repr(C)]
#[derive(Debug)]
pub struct PsCardPrinting {
    pub name: *mut c_char,
    pub set_code: *mut c_char,
    pub language: *mut c_char,
    pub front_image_url: *mut c_char,
    /// Null for single-faced printings.
    pub back_image_url: *mut c_char,
    pub back_kind: i32,
    pub back_name: *mut c_char,
}

#[repr(C)]
#[derive(Debug)]
pub struct PsResolvedCard {
    pub name: *mut c_char,
    pub set_code: *mut c_char,
    pub language: *mut c_char,
    pub front_url: *mut c_char,
    pub back_url: *mut c_char,
    pub quantity: u32,
    pub face_mode: i32,
    pub back_kind: i32,
    pub back_name: *mut c_char,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PsBackgroundProgress {
    pub phase: i32,
    pub current_entry: usize,
    pub total_entries: usize,
    pub selected_loaded: usize,
    pub alternatives_loaded: usize,
    pub total_alternatives: usize,
    pub error_count: usize,
}

impl From<LoadProgress> for PsBackgroundProgress {
    fn from(progress: LoadProgress) -> Self {
        Self {
            phase: progress.phase.as_i32(),
            current_entry: progress.current_entry,
            total_entries: progress.total_entries,
            selected_loaded: progress.selected_loaded,
            alternatives_loaded: progress.alternatives_loaded,
            total_alternatives: progress.total_alternatives,
            error_count: progress.error_count,
        }
    }
}

/// `kind` is 1 for cached, 2 for removed.
#[repr(C)]
#[derive(Debug)]
pub struct PsImageCacheChange {
    pub kind: u8,
    pub url: *mut c_char,
    pub timestamp_ms: u64,
}

#[repr(C)]
#[derive(Debug)]
pub struct PsImageCacheChangeArray {
    pub changes: *mut PsImageCacheChange,
    pub count: usize,
}

// ---- strings ----

/// Borrow a required input string.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
pub unsafe fn read_str<'a>(ptr: *const c_char) -> Result<&'a str, Status> {
    if ptr.is_null() {
        return Err(Status::NullPointer);
    }
    CStr::from_ptr(ptr).to_str().map_err(|_| Status::InvalidInput)
}

/// Borrow an optional input string; null reads as `None`.
///
/// # Safety
///
/// Same as [`read_str`].
pub unsafe fn read_opt_str<'a>(ptr: *const c_char) -> Result<Option<&'a str>, Status> {
    if ptr.is_null() {
        return Ok(None);
    }
    read_str(ptr).map(Some)
}

/// Allocate an owned C string. Interior NULs are invalid input.
pub fn to_c_string(value: &str) -> Result<*mut c_char, Status> {
    CString::new(value)
        .map(CString::into_raw)
        .map_err(|_| Status::InvalidInput)
}

pub fn to_opt_c_string(value: Option<&str>) -> Result<*mut c_char, Status> {
    value.map_or(Ok(ptr::null_mut()), to_c_string)
}

/// Free a string produced by [`to_c_string`] and null the slot.
///
/// # Safety
///
/// `*slot` must be null or a pointer from `CString::into_raw` not yet freed.
pub unsafe fn free_c_string(slot: &mut *mut c_char) {
    if !slot.is_null() {
        drop(CString::from_raw(*slot));
        *slot = ptr::null_mut();
    }
}

// ---- arrays ----

/// Output structs owning heap strings.
pub trait Release {
    /// Free every owned field, leaving the value safe to release again.
    ///
    /// # Safety
    ///
    /// Every non-null pointer field must be owned by this value.
    unsafe fn release(&mut self);
}

/// Output array under construction.
///
/// Dropping a builder releases everything pushed so far, so an error
/// partway through leaves nothing allocated.
pub struct ArrayBuilder<T: Release> {
    items: Vec<T>,
}

impl<T: Release> ArrayBuilder<T> {
    pub fn with_capacity(capacity: usize) -> Result<Self, Status> {
        let mut items = Vec::new();
        items
            .try_reserve_exact(capacity)
            .map_err(|_| Status::OutOfMemory)?;
        Ok(Self { items })
    }

    pub fn push(&mut self, item: T) -> Result<(), Status> {
        self.items.try_reserve(1).map_err(|_| Status::OutOfMemory)?;
        self.items.push(item);
        Ok(())
    }

    /// Hand the array to the caller. An empty array is `(null, 0)`.
    pub fn into_raw(self) -> (*mut T, usize) {
        let mut this = ManuallyDrop::new(self);
        let items = std::mem::take(&mut this.items);
        if items.is_empty() {
            return (ptr::null_mut(), 0);
        }
        let count = items.len();
        let ptr = Box::into_raw(items.into_boxed_slice()) as *mut T;
        (ptr, count)
    }
}

impl<T: Release> Drop for ArrayBuilder<T> {
    fn drop(&mut self) {
        for item in &mut self.items {
            // SAFETY: items were built by this module and never handed out.
            unsafe { item.release() };
        }
    }
}

/// Free an array produced by [`ArrayBuilder::into_raw`].
///
/// # Safety
///
/// `(ptr, count)` must come from `into_raw` for the same `T` and not have
/// been freed. Null is a no-op.
pub unsafe fn free_array<T: Release>(ptr: *mut T, count: usize) {
    if ptr.is_null() {
        return;
    }
    let mut items = Box::from_raw(ptr::slice_from_raw_parts_mut(ptr, count));
    for item in items.iter_mut() {
        item.release();
    }
}

/// Build an output array, all or nothing.
pub fn build_array<S, T: Release>(
    source: &[S],
    convert: impl Fn(&S) -> Result<T, Status>,
) -> Result<(*mut T, usize), Status> {
    let mut builder = ArrayBuilder::with_capacity(source.len())?;
    for item in source {
        builder.push(convert(item)?)?;
    }
    Ok(builder.into_raw())
}

/// Copy bytes into a caller-owned buffer, released with `free_bytes`.
pub fn bytes_into_raw(bytes: &[u8]) -> Result<(*mut u8, usize), Status> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(bytes.len())
        .map_err(|_| Status::OutOfMemory)?;
    buffer.extend_from_slice(bytes);
    let len = buffer.len();
    Ok((Box::into_raw(buffer.into_boxed_slice()) as *mut u8, len))
}

/// # Safety
///
/// `(ptr, len)` must come from [`bytes_into_raw`] and not have been freed.
pub unsafe fn free_bytes(ptr: *mut u8, len: usize) {
    if !ptr.is_null() {
        drop(Box::from_raw(ptr::slice_from_raw_parts_mut(ptr, len)));
    }
}

/// Plain `char*` elements of a string array.
#[repr(transparent)]
pub struct OwnedString(pub *mut c_char);

impl Release for OwnedString {
    unsafe fn release(&mut self) {
        free_c_string(&mut self.0);
    }
}

// ---- conversions out ----

impl Release for PsDecklistEntry {
    unsafe fn release(&mut self) {
        free_c_string(&mut self.name);
        free_c_string(&mut self.set);
        free_c_string(&mut self.language);
    }
}

impl Release for PsCardPrinting {
    unsafe fn release(&mut self) {
        free_c_string(&mut self.name);
        free_c_string(&mut self.set_code);
        free_c_string(&mut self.language);
        free_c_string(&mut self.front_image_url);
        free_c_string(&mut self.back_image_url);
        free_c_string(&mut self.back_name);
    }
}

impl Release for PsResolvedCard {
    unsafe fn release(&mut self) {
        free_c_string(&mut self.name);
        free_c_string(&mut self.set_code);
        free_c_string(&mut self.language);
        free_c_string(&mut self.front_url);
        free_c_string(&mut self.back_url);
        free_c_string(&mut self.back_name);
    }
}

impl Release for PsImageCacheChange {
    unsafe fn release(&mut self) {
        free_c_string(&mut self.url);
    }
}

impl PsDecklistEntry {
    pub fn from_entry(entry: &DecklistEntry) -> Result<Self, Status> {
        let mut out = Self {
            quantity: entry.quantity,
            name: ptr::null_mut(),
            set: ptr::null_mut(),
            language: ptr::null_mut(),
            face_mode: entry.face_mode.map_or(PS_NONE, FaceMode::as_i32),
            source_line: entry
                .source_line
                .and_then(|line| i32::try_from(line).ok())
                .unwrap_or(PS_NONE),
        };
        let filled = (|| -> Result<(), Status> {
            out.name = to_c_string(&entry.name)?;
            out.set = to_opt_c_string(entry.set.as_deref())?;
            out.language = to_opt_c_string(entry.language.as_deref())?;
            Ok(())
        })();
        finish(out, filled)
    }

    /// # Safety
    ///
    /// String fields must be null or valid NUL-terminated strings.
    pub unsafe fn to_entry(&self) -> Result<DecklistEntry, Status> {
        let mut entry = DecklistEntry::new(self.quantity, read_str(self.name)?);
        if let Some(set) = read_opt_str(self.set)? {
            entry = entry.with_set(set);
        }
        if let Some(language) = read_opt_str(self.language)? {
            entry = entry.with_language(language);
        }
        if let Some(mode) = FaceMode::from_i32(self.face_mode) {
            entry = entry.with_face_mode(mode);
        }
        if let Ok(line) = u32::try_from(self.source_line) {
            entry = entry.with_source_line(line);
        }
        Ok(entry)
    }
}

impl PsCardPrinting {
    pub fn from_printing(printing: &CardPrinting) -> Result<Self, Status> {
        let mut out = Self {
            name: ptr::null_mut(),
            set_code: ptr::null_mut(),
            language: ptr::null_mut(),
            front_image_url: ptr::null_mut(),
            back_image_url: ptr::null_mut(),
            back_kind: printing.back_kind.as_i32(),
            back_name: ptr::null_mut(),
        };
        let filled = (|| -> Result<(), Status> {
            out.name = to_c_string(&printing.name)?;
            out.set_code = to_c_string(&printing.set_code)?;
            out.language = to_c_string(&printing.language)?;
            out.front_image_url = to_c_string(&printing.front_image_url)?;
            out.back_image_url = to_opt_c_string(printing.back_image_url.as_deref())?;
            out.back_name = to_opt_c_string(printing.back_name.as_deref())?;
            Ok(())
        })();
        finish(out, filled)
    }

    /// # Safety
    ///
    /// String fields must be null or valid NUL-terminated strings.
    pub unsafe fn to_printing(&self) -> Result<CardPrinting, Status> {
        let back_image_url = read_opt_str(self.back_image_url)?.map(str::to_string);
        let back_kind = match back_image_url {
            Some(_) => BackKind::from_i32(self.back_kind),
            None => BackKind::None,
        };
        Ok(CardPrinting {
            name: read_str(self.name)?.to_string(),
            set_code: read_str(self.set_code)?.to_string(),
            language: read_str(self.language)?.to_string(),
            front_image_url: read_str(self.front_image_url)?.to_string(),
            back_image_url,
            back_kind,
            back_name: read_opt_str(self.back_name)?.map(str::to_string),
        })
    }
}

impl PsResolvedCard {
    pub fn from_card(card: &ResolvedCard) -> Result<Self, Status> {
        let mut out = Self {
            name: ptr::null_mut(),
            set_code: ptr::null_mut(),
            language: ptr::null_mut(),
            front_url: ptr::null_mut(),
            back_url: ptr::null_mut(),
            quantity: card.quantity,
            face_mode: card.face_mode.as_i32(),
            back_kind: card.back_kind.as_i32(),
            back_name: ptr::null_mut(),
        };
        let filled = (|| -> Result<(), Status> {
            out.name = to_c_string(&card.name)?;
            out.set_code = to_c_string(&card.set_code)?;
            out.language = to_c_string(&card.language)?;
            out.front_url = to_c_string(&card.front_url)?;
            out.back_url = to_opt_c_string(card.back_url.as_deref())?;
            out.back_name = to_opt_c_string(card.back_name.as_deref())?;
            Ok(())
        })();
        finish(out, filled)
    }

    /// # Safety
    ///
    /// String fields must be null or valid NUL-terminated strings.
    pub unsafe fn to_card(&self) -> Result<ResolvedCard, Status> {
        let face_mode = FaceMode::from_i32(self.face_mode).ok_or(Status::InvalidInput)?;
        let back_image_url = read_opt_str(self.back_url)?.map(str::to_string);
        let back_kind = match back_image_url {
            Some(_) => BackKind::from_i32(self.back_kind),
            None => BackKind::None,
        };
        let printing = CardPrinting {
            name: read_str(self.name)?.to_string(),
            set_code: read_str(self.set_code)?.to_string(),
            language: read_str(self.language)?.to_string(),
            front_image_url: read_str(self.front_url)?.to_string(),
            back_image_url,
            back_kind,
            back_name: read_opt_str(self.back_name)?.map(str::to_string),
        };
        Ok(ResolvedCard::from_printing(&printing, self.quantity, face_mode))
    }
}

impl PsImageCacheChange {
    pub fn from_change(change: &ImageCacheChange) -> Result<Self, Status> {
        Ok(Self {
            kind: change.kind.as_u8(),
            url: to_c_string(&change.url)?,
            timestamp_ms: change.timestamp_ms,
        })
    }
}

/// Return `out` on success, otherwise release its partial fields.
fn finish<T: Release>(mut out: T, filled: Result<(), Status>) -> Result<T, Status> {
    match filled {
        Ok(()) => Ok(out),
        Err(status) => {
            // SAFETY: fields are either null or freshly allocated above.
            unsafe { out.release() };
            Err(status)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::mock::fixtures;

    #[test]
    fn test_printing_round_trip_keeps_back() {
        let printing = fixtures::fable("neo");
        let mut c = PsCardPrinting::from_printing(&printing).unwrap();

        let back = unsafe { c.to_printing() }.unwrap();
        assert_eq!(back, printing);

        unsafe { c.release() };
        assert!(c.name.is_null());
        assert!(c.back_image_url.is_null());
        // Releasing twice is harmless once fields are nulled.
        unsafe { c.release() };
    }

    #[test]
    fn test_interior_nul_is_invalid_input() {
        let entry = DecklistEntry::new(1, "Bad\0Name");
        assert_eq!(
            PsDecklistEntry::from_entry(&entry).unwrap_err(),
            Status::InvalidInput
        );
    }

    #[test]
    fn test_failure_mid_array_allocates_nothing() {
        let entries = vec![
            DecklistEntry::new(1, "Lightning Bolt"),
            DecklistEntry::new(1, "Bad\0Name"),
        ];
        let result = build_array(&entries, PsDecklistEntry::from_entry);
        assert_eq!(result.unwrap_err(), Status::InvalidInput);
    }

    #[test]
    fn test_empty_array_is_null() {
        let (ptr, count) = build_array(&[] as &[DecklistEntry], PsDecklistEntry::from_entry).unwrap();
        assert!(ptr.is_null());
        assert_eq!(count, 0);
        unsafe { free_array(ptr, count) };
    }

    #[test]
    fn test_entry_sentinels() {
        let entry = DecklistEntry::new(3, "Lightning Bolt").with_set("M10");
        let (ptr, count) = build_array(std::slice::from_ref(&entry), PsDecklistEntry::from_entry).unwrap();
        let c = unsafe { &*ptr };
        assert_eq!(c.quantity, 3);
        assert_eq!(c.face_mode, PS_NONE);
        assert_eq!(c.source_line, PS_NONE);
        assert!(c.language.is_null());

        let back = unsafe { c.to_entry() }.unwrap();
        assert_eq!(back, entry);
        unsafe { free_array(ptr, count) };
    }

    #[test]
    fn test_resolved_card_rejects_bad_face_mode() {
        let card = ResolvedCard::from_printing(&fixtures::bolt("m10"), 1, FaceMode::FrontOnly);
        let mut c = PsResolvedCard::from_card(&card).unwrap();
        c.face_mode = 9;
        assert_eq!(unsafe { c.to_card() }.unwrap_err(), Status::InvalidInput);
        unsafe { c.release() };
    }

    #[test]
    fn test_bytes_buffer() {
        let (ptr, len) = bytes_into_raw(b"image").unwrap();
        assert_eq!(len, 5);
        assert_eq!(unsafe { std::slice::from_raw_parts(ptr, len) }, b"image");
        unsafe { free_bytes(ptr, len) };
        unsafe { free_bytes(ptr::null_mut(), 0) };
    }
}
