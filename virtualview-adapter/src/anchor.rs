use core::fmt;

use virtualview::{DataSource, Measurer, Realizer, Renderer};

/// Keeps the viewport pinned to an item identity across reloads.
///
/// Typical uses: loading older messages above a chat timeline, or a full reset after which
/// the user should still look at the same item.
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FocusAnchor<K> {
    pub key: K,
    /// Scroll offset minus the anchor item's leading edge. Negative when the item starts below
    /// the leading edge of the viewport.
    pub offset_in_viewport: i64,
}

impl<K: fmt::Debug> fmt::Debug for FocusAnchor<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FocusAnchor")
            .field("key", &self.key)
            .field("offset_in_viewport", &self.offset_in_viewport)
            .finish()
    }
}

/// Captures an anchor on the first displayed item.
///
/// Returns `None` while nothing is displayed.
pub fn capture_focus_anchor<K, D, R, M>(
    view: &Realizer<D, R, M>,
    key_for: impl FnOnce(usize) -> K,
) -> Option<FocusAnchor<K>>
where
    D: DataSource,
    R: Renderer,
    M: Measurer,
{
    let index = view.window_state().first_displayed?;
    anchor_on(view, index, key_for)
}

/// Captures an anchor on the item under `offset_in_viewport`, measured from the leading edge of
/// the viewport.
pub fn capture_focus_anchor_at<K, D, R, M>(
    view: &Realizer<D, R, M>,
    offset_in_viewport: u64,
    key_for: impl FnOnce(usize) -> K,
) -> Option<FocusAnchor<K>>
where
    D: DataSource,
    R: Renderer,
    M: Measurer,
{
    let pixel = view.scroll_offset().saturating_add(offset_in_viewport);
    let (first, _) = view.layout().items_from_range(pixel, pixel)?;
    anchor_on(view, first, key_for)
}

fn anchor_on<K, D, R, M>(
    view: &Realizer<D, R, M>,
    index: usize,
    key_for: impl FnOnce(usize) -> K,
) -> Option<FocusAnchor<K>>
where
    D: DataSource,
    R: Renderer,
    M: Measurer,
{
    let geometry = view.layout().item_geometry(index)?;
    let start = geometry.bounds.main_start(view.options().orientation);
    Some(FocusAnchor {
        key: key_for(index),
        offset_in_viewport: view.scroll_offset() as i64 - start as i64,
    })
}

/// Scrolls so the anchored item sits where it was captured.
///
/// `key_to_index` maps the key into the *current* data set. Call this once the layout has
/// caught up with the reload (the view is idle). Returns the applied, clamped offset, which
/// the host must mirror into its scroll container.
pub fn apply_focus_anchor<K, D, R, M>(
    view: &mut Realizer<D, R, M>,
    anchor: &FocusAnchor<K>,
    key_to_index: impl FnOnce(&K) -> Option<usize>,
) -> Option<u64>
where
    D: DataSource,
    R: Renderer,
    M: Measurer,
{
    let index = key_to_index(&anchor.key)?;
    let geometry = view.layout().item_geometry(index)?;
    let start = geometry.bounds.main_start(view.options().orientation);
    let target = start
        .saturating_add_signed(anchor.offset_in_viewport)
        .min(view.max_scroll_offset());
    vdebug!(index, target, "apply_focus_anchor");
    view.on_scroll(target);
    view.end_scroll_gesture();
    Some(target)
}
