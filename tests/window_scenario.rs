use jobs_tui::window::{RenderWindow, ShiftDirection, WindowedList};
use proptest::prelude::*;

const PAGE: usize = 20;
const PAGES: usize = 3;
const CARD: u16 = 4;
const VIEWPORT: u16 = 24;

#[test]
fn scrolling_120_records_walks_the_window_forward() {
    let measure = |_: usize| CARD;
    let mut list = WindowedList::new(PAGE, PAGES, 2);
    list.reset(120);
    assert_eq!(list.window(), RenderWindow { start: 0, end: 60 });
    assert_eq!(list.rows().count(), 60);

    let mut shifts = 0;
    for _ in 0..2_000 {
        let before = list.window();
        if let Some(shift) = list.scroll_by(i32::from(CARD), VIEWPORT, &measure) {
            assert_eq!(shift.direction, ShiftDirection::Forward);
            shifts += 1;
            let expected_end = (60 + PAGE * shifts).min(120);
            assert_eq!(
                list.window(),
                RenderWindow {
                    start: expected_end - 60,
                    end: expected_end
                }
            );
            let retained = before.end.min(list.window().end) - before.start.max(list.window().start);
            assert_eq!(retained, 40);
            list.finish_render();
        }
        assert_eq!(list.rows().count(), list.window().len());
        assert!(list.window().len() <= list.cap());
    }
    assert_eq!(shifts, 3);
    assert_eq!(list.window(), RenderWindow { start: 60, end: 120 });

    let bottom = list.content_height(&measure) - u32::from(VIEWPORT);
    assert_eq!(list.scroll_offset(), bottom);
}

#[test]
fn scrolling_back_to_top_restores_first_window() {
    let measure = |_: usize| CARD;
    let mut list = WindowedList::new(PAGE, PAGES, 2);
    list.reset(120);
    for _ in 0..2_000 {
        if list.scroll_by(i32::from(CARD), VIEWPORT, &measure).is_some() {
            list.finish_render();
        }
    }
    for _ in 0..2_000 {
        if let Some(shift) = list.scroll_by(-i32::from(CARD), VIEWPORT, &measure) {
            assert_eq!(shift.direction, ShiftDirection::Backward);
            list.finish_render();
        }
    }
    assert_eq!(list.window(), RenderWindow { start: 0, end: 60 });
    assert_eq!(list.scroll_offset(), 0);
}

fn heights_strategy() -> impl Strategy<Value = Vec<u16>> {
    prop::collection::vec(1u16..7, 1..260)
}

proptest! {
    #[test]
    fn window_stays_within_cap(heights in heights_strategy(), steps in prop::collection::vec(-40i32..40, 1..120)) {
        let measure = |position: usize| heights[position];
        let mut list = WindowedList::new(PAGE, PAGES, 2);
        list.reset(heights.len());
        for delta in steps {
            list.scroll_by(delta, VIEWPORT, &measure);
            list.finish_render();
            let window = list.window();
            prop_assert!(window.start <= window.end);
            prop_assert!(window.end <= heights.len());
            prop_assert!(window.len() <= list.cap());
            prop_assert_eq!(list.rows().count(), window.len());
        }
    }

    #[test]
    fn shifts_keep_the_top_row_anchored(heights in heights_strategy(), steps in prop::collection::vec(-40i32..40, 1..120)) {
        let measure = |position: usize| heights[position];
        let mut list = WindowedList::new(PAGE, PAGES, 2);
        list.reset(heights.len());
        for delta in steps {
            let max_offset = list.content_height(&measure).saturating_sub(u32::from(VIEWPORT));
            let target = (i64::from(list.scroll_offset()) + i64::from(delta)).clamp(0, i64::from(max_offset));
            let probe = {
                let mut at = list.clone();
                at.restore(heights.len(), list.window(), target as u32);
                at.top_visible(&measure)
                    .and_then(|top| at.offset_of(top, &measure).map(|y| (top, i64::from(y) - target)))
            };
            if list.scroll_by(delta, VIEWPORT, &measure).is_some() {
                if let Some((top, screen_y)) = probe {
                    if let Some(y) = list.offset_of(top, &measure) {
                        prop_assert_eq!(i64::from(y) - i64::from(list.scroll_offset()), screen_y);
                    }
                }
                list.finish_render();
            }
        }
    }

    #[test]
    fn reset_matches_first_pages(len in 0usize..500) {
        let mut list = WindowedList::new(PAGE, PAGES, 2);
        list.reset(len);
        prop_assert_eq!(list.window(), RenderWindow { start: 0, end: len.min(60) });
        prop_assert_eq!(list.scroll_offset(), 0);
    }
}
