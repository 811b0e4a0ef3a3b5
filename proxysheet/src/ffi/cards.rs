//! Decklist, printing and resolution entry points.

use std::ffi::c_char;
use std::slice;

use super::types::{
    build_array, free_array, read_str, to_c_string, ArrayBuilder, OwnedString, PsCardPrinting,
    PsDecklistEntry, PsResolvedCard,
};
use super::{engine, guard, outside_runtime, status_of, write_out};
use crate::card::{copy_faces, FaceMode};
use crate::decklist::parse_decklist;
use crate::error::Status;

/// Borrow a caller array, treating `(null, 0)` as empty.
///
/// # Safety
///
/// A non-null `ptr` must point to `count` initialized values.
unsafe fn input_slice<'a, T>(ptr: *const T, count: usize) -> Result<&'a [T], Status> {
    match (ptr.is_null(), count) {
        (true, 0) => Ok(&[]),
        (true, _) => Err(Status::NullPointer),
        (false, _) => Ok(slice::from_raw_parts(ptr, count)),
    }
}

/// Tokenize decklist text. Does not need an initialized engine.
///
/// # Safety
///
/// `text` must be a valid NUL-terminated string; the out pointers must be
/// valid for writes.
#[no_mangle]
pub unsafe extern "C" fn proxysheet_parse_decklist(
    text: *const c_char,
    out_entries: *mut *mut PsDecklistEntry,
    out_count: *mut usize,
) -> i32 {
    guard("proxysheet_parse_decklist", || {
        if out_entries.is_null() || out_count.is_null() {
            return Err(Status::NullPointer);
        }
        let text = read_str(text)?;
        let entries = parse_decklist(text);
        let (ptr, count) = build_array(&entries, PsDecklistEntry::from_entry)?;
        write_out(out_entries, ptr);
        write_out(out_count, count);
        Ok(Status::Success.code())
    })
}

/// # Safety
///
/// `(entries, count)` must come from [`proxysheet_parse_decklist`].
#[no_mangle]
pub unsafe extern "C" fn proxysheet_free_decklist_entries(entries: *mut PsDecklistEntry, count: usize) {
    free_array(entries, count);
}

/// Every printing of a card, in catalog order.
///
/// An unknown card is `InvalidInput`; catalog failures are `ParseFailed`.
///
/// # Safety
///
/// `name` must be a valid NUL-terminated string; the out pointers must be
/// valid for writes.
#[no_mangle]
pub unsafe extern "C" fn proxysheet_search_printings(
    name: *const c_char,
    out_printings: *mut *mut PsCardPrinting,
    out_count: *mut usize,
) -> i32 {
    guard("proxysheet_search_printings", || {
        if out_printings.is_null() || out_count.is_null() {
            return Err(Status::NullPointer);
        }
        outside_runtime("proxysheet_search_printings")?;
        let name = read_str(name)?;
        let printings = engine()?.search_printings(name).map_err(status_of)?;
        let (ptr, count) = build_array(&printings, PsCardPrinting::from_printing)?;
        write_out(out_printings, ptr);
        write_out(out_count, count);
        Ok(Status::Success.code())
    })
}

/// # Safety
///
/// `(printings, count)` must come from [`proxysheet_search_printings`].
#[no_mangle]
pub unsafe extern "C" fn proxysheet_free_printings(printings: *mut PsCardPrinting, count: usize) {
    free_array(printings, count);
}

/// Resolve entries to printings.
///
/// Entries that match no card are skipped and counted in `out_failed`; the
/// resolved array holds the rest in entry order. Blocks until done.
///
/// # Safety
///
/// `entries` must point to `count` valid entries (or be null with a zero
/// count); the out pointers must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn proxysheet_resolve_entries(
    entries: *const PsDecklistEntry,
    count: usize,
    face_mode: i32,
    out_cards: *mut *mut PsResolvedCard,
    out_count: *mut usize,
    out_failed: *mut usize,
) -> i32 {
    guard("proxysheet_resolve_entries", || {
        if out_cards.is_null() || out_count.is_null() || out_failed.is_null() {
            return Err(Status::NullPointer);
        }
        outside_runtime("proxysheet_resolve_entries")?;
        let global_mode = FaceMode::from_i32(face_mode).ok_or(Status::InvalidInput)?;
        let entries = input_slice(entries, count)?
            .iter()
            .map(|entry| entry.to_entry())
            .collect::<Result<Vec<_>, _>>()?;

        let resolution = engine()?.resolve(&entries, global_mode);
        let (ptr, resolved) = build_array(&resolution.cards, PsResolvedCard::from_card)?;
        write_out(out_cards, ptr);
        write_out(out_count, resolved);
        write_out(out_failed, resolution.failures.len());
        Ok(Status::Success.code())
    })
}

/// # Safety
///
/// `(cards, count)` must come from [`proxysheet_resolve_entries`].
#[no_mangle]
pub unsafe extern "C" fn proxysheet_free_resolved_cards(cards: *mut PsResolvedCard, count: usize) {
    free_array(cards, count);
}

/// Expand one printing into the ordered image URLs `quantity` copies print.
///
/// Shared by preview and document generation so both agree on which faces
/// appear. Pure; does not need an initialized engine. A quantity whose
/// expansion cannot be allocated is `OutOfMemory`.
///
/// # Safety
///
/// `printing` must point to a valid printing; the out pointers must be
/// valid for writes.
#[no_mangle]
pub unsafe extern "C" fn proxysheet_expand_image_urls(
    printing: *const PsCardPrinting,
    quantity: u32,
    face_mode: i32,
    out_urls: *mut *mut *mut c_char,
    out_count: *mut usize,
) -> i32 {
    guard("proxysheet_expand_image_urls", || {
        if printing.is_null() || out_urls.is_null() || out_count.is_null() {
            return Err(Status::NullPointer);
        }
        let face_mode = FaceMode::from_i32(face_mode).ok_or(Status::InvalidInput)?;
        let printing = (*printing).to_printing()?;

        let faces = copy_faces(&printing, face_mode);
        let total = usize::try_from(quantity)
            .ok()
            .and_then(|quantity| quantity.checked_mul(faces.len()))
            .ok_or(Status::OutOfMemory)?;

        // Same order as `expand_image_urls`, built without an infallible
        // intermediate vector.
        let mut urls = ArrayBuilder::with_capacity(total)?;
        for _ in 0..quantity {
            for face in &faces {
                urls.push(OwnedString(to_c_string(face)?))?;
            }
        }
        let (ptr, count) = urls.into_raw();
        write_out(out_urls, ptr.cast::<*mut c_char>());
        write_out(out_count, count);
        Ok(Status::Success.code())
    })
}

/// # Safety
///
/// `(urls, count)` must come from [`proxysheet_expand_image_urls`].
#[no_mangle]
pub unsafe extern "C" fn proxysheet_free_string_array(urls: *mut *mut c_char, count: usize) {
    free_array(urls.cast::<OwnedString>(), count);
}

#[cfg(test)]
mod tests {
    use super::super::test_support::session;
    use super::*;
    use crate::card::BackKind;
    use crate::catalog::mock::fixtures;
    use std::ffi::CStr;
    use std::ptr;

    unsafe fn string_at(ptr: *mut c_char) -> String {
        CStr::from_ptr(ptr).to_str().unwrap().to_string()
    }

    #[test]
    fn test_parse_decklist() {
        let mut entries = ptr::null_mut();
        let mut count = 0usize;
        let text = c"// main\n4 Lightning Bolt [M10]\n1 Shock (ja)\n";

        let status = unsafe { proxysheet_parse_decklist(text.as_ptr(), &mut entries, &mut count) };
        assert_eq!(status, 0);
        assert_eq!(count, 2);

        let parsed = unsafe { slice::from_raw_parts(entries, count) };
        assert_eq!(parsed[0].quantity, 4);
        assert_eq!(unsafe { string_at(parsed[0].set) }, "m10");
        assert_eq!(parsed[0].source_line, 2);
        assert!(parsed[1].set.is_null());
        assert_eq!(unsafe { string_at(parsed[1].language) }, "ja");

        unsafe { proxysheet_free_decklist_entries(entries, count) };
    }

    #[test]
    fn test_expand_double_faced_both_sides() {
        let printing = PsCardPrinting::from_printing(&fixtures::fable("neo")).unwrap();
        let mut urls = ptr::null_mut();
        let mut count = 0usize;

        let status = unsafe {
            proxysheet_expand_image_urls(&printing, 2, FaceMode::BothSides.as_i32(), &mut urls, &mut count)
        };
        assert_eq!(status, 0);
        assert_eq!(count, 4);

        let expanded: Vec<String> = unsafe { slice::from_raw_parts(urls, count) }
            .iter()
            .map(|&url| unsafe { string_at(url) })
            .collect();
        assert_eq!(
            expanded,
            vec![
                "https://img.test/neo/fable-front.jpg",
                "https://img.test/neo/fable-back.jpg",
                "https://img.test/neo/fable-front.jpg",
                "https://img.test/neo/fable-back.jpg",
            ]
        );

        unsafe { proxysheet_free_string_array(urls, count) };
        let mut printing = printing;
        unsafe { super::super::types::Release::release(&mut printing) };
    }

    #[test]
    fn test_expand_matches_rust_expansion() {
        let fable = fixtures::fable("neo");
        for mode in [FaceMode::FrontOnly, FaceMode::BackOnly, FaceMode::BothSides] {
            let printing = PsCardPrinting::from_printing(&fable).unwrap();
            let mut urls = ptr::null_mut();
            let mut count = 0usize;
            let status =
                unsafe { proxysheet_expand_image_urls(&printing, 3, mode.as_i32(), &mut urls, &mut count) };
            assert_eq!(status, 0);

            let expanded: Vec<String> = unsafe { slice::from_raw_parts(urls, count) }
                .iter()
                .map(|&url| unsafe { string_at(url) })
                .collect();
            assert_eq!(expanded, crate::card::expand_image_urls(&fable, 3, mode));

            unsafe { proxysheet_free_string_array(urls, count) };
            let mut printing = printing;
            unsafe { super::super::types::Release::release(&mut printing) };
        }
    }

    #[test]
    fn test_expand_zero_quantity_is_empty_array() {
        let printing = PsCardPrinting::from_printing(&fixtures::bolt("m10")).unwrap();
        let mut urls = ptr::null_mut();
        let mut count = 7usize;
        let status = unsafe {
            proxysheet_expand_image_urls(&printing, 0, FaceMode::FrontOnly.as_i32(), &mut urls, &mut count)
        };
        assert_eq!(status, 0);
        assert!(urls.is_null());
        assert_eq!(count, 0);
        let mut printing = printing;
        unsafe { super::super::types::Release::release(&mut printing) };
    }

    #[test]
    fn test_expand_huge_quantity_is_out_of_memory() {
        let printing = PsCardPrinting::from_printing(&fixtures::fable("neo")).unwrap();
        let mut urls = ptr::null_mut();
        let mut count = 0usize;
        let status = unsafe {
            proxysheet_expand_image_urls(
                &printing,
                u32::MAX,
                FaceMode::BothSides.as_i32(),
                &mut urls,
                &mut count,
            )
        };
        assert_eq!(status, Status::OutOfMemory.code());
        assert!(urls.is_null());
        assert_eq!(count, 0);
        let mut printing = printing;
        unsafe { super::super::types::Release::release(&mut printing) };
    }

    #[test]
    fn test_expand_rejects_unknown_face_mode() {
        let printing = PsCardPrinting::from_printing(&fixtures::bolt("m10")).unwrap();
        let mut urls = ptr::null_mut();
        let mut count = 0usize;
        let status = unsafe { proxysheet_expand_image_urls(&printing, 1, 5, &mut urls, &mut count) };
        assert_eq!(status, Status::InvalidInput.code());
        assert!(urls.is_null());
        let mut printing = printing;
        unsafe { super::super::types::Release::release(&mut printing) };
    }

    #[test]
    fn test_search_and_resolve() {
        let _session = session();

        let mut printings = ptr::null_mut();
        let mut count = 0usize;
        let status = unsafe {
            proxysheet_search_printings(
                c"Fable of the Mirror-Breaker // Reflection of Kiki-Jiki".as_ptr(),
                &mut printings,
                &mut count,
            )
        };
        assert_eq!(status, 0);
        assert_eq!(count, 2);
        let first = unsafe { &*printings };
        assert_eq!(first.back_kind, BackKind::DoubleFaced.as_i32());
        unsafe { proxysheet_free_printings(printings, count) };

        let decklist = [
            crate::card::DecklistEntry::new(2, "Lightning Bolt").with_set("lea"),
            crate::card::DecklistEntry::new(1, "Black Lotus"),
        ];
        let (entries, entry_count) = build_array(&decklist, PsDecklistEntry::from_entry).unwrap();

        let mut cards = ptr::null_mut();
        let mut resolved = 0usize;
        let mut failed = 0usize;
        let status = unsafe {
            proxysheet_resolve_entries(
                entries,
                entry_count,
                FaceMode::BothSides.as_i32(),
                &mut cards,
                &mut resolved,
                &mut failed,
            )
        };
        assert_eq!(status, 0);
        assert_eq!(resolved, 1);
        assert_eq!(failed, 1);

        let card = unsafe { &*cards };
        assert_eq!(unsafe { string_at(card.set_code) }, "lea");
        assert_eq!(card.quantity, 2);
        assert_eq!(card.face_mode, FaceMode::FrontOnly.as_i32());
        assert!(card.back_url.is_null());

        unsafe {
            proxysheet_free_resolved_cards(cards, resolved);
            proxysheet_free_decklist_entries(entries, entry_count);
        }
    }

    #[test]
    fn test_unknown_search_is_invalid_input() {
        let _session = session();
        let mut printings = ptr::null_mut();
        let mut count = 0usize;
        let status = unsafe {
            proxysheet_search_printings(c"Black Lotus".as_ptr(), &mut printings, &mut count)
        };
        assert_eq!(status, Status::InvalidInput.code());
        assert!(printings.is_null());
    }
}
