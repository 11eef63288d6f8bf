// Example: loading older messages above a chat timeline without moving the viewport.
use virtualview::{
    Bounds, DataSource, ItemMetrics, ItemRequest, LayoutKind, Measurer, Notification, PumpStatus,
    RecordHandle, Renderer, RequestId, Size, ViewOptions, VisualId, VisualTransform,
};
use virtualview_adapter::Controller;

struct Timeline {
    ids: Vec<u64>,
}

impl DataSource for Timeline {
    fn count(&self) -> usize {
        self.ids.len()
    }

    fn request_item(&mut self, index: usize) -> ItemRequest {
        ItemRequest::Ready(RecordHandle(self.ids[index]))
    }

    fn cancel_request(&mut self, _request: RequestId) {}

    fn release_item(&mut self, _record: RecordHandle) {}
}

#[derive(Default)]
struct Ids(u64);

impl Renderer for Ids {
    fn render_item(&mut self, _index: usize, _record: RecordHandle) -> VisualId {
        self.0 += 1;
        VisualId(self.0)
    }

    fn render_header(&mut self, _group: usize, _key: u64) -> VisualId {
        self.0 += 1;
        VisualId(self.0)
    }

    fn place(&mut self, _visual: VisualId, _bounds: Bounds) {}

    fn apply_transform(&mut self, _visual: VisualId, _transform: VisualTransform) {}

    fn remove(&mut self, _visual: VisualId) {}
}

struct Viewport;

impl Measurer for Viewport {
    fn viewport(&self) -> Size {
        Size::new(360, 600)
    }

    fn create_surface(&mut self) {}

    fn remove_surface(&mut self) {}

    fn measure(&mut self, _visual: VisualId) -> Option<ItemMetrics> {
        None
    }
}

type Chat = Controller<Timeline, Ids, Viewport>;

fn idle(c: &mut Chat, now_ms: &mut u64) {
    while c.tick(*now_ms).expect("tick").status == PumpStatus::Busy {
        *now_ms += 16;
    }
    c.render_complete();
}

fn main() {
    let options = ViewOptions::new(LayoutKind::List).with_item_size(Some(Size::new(360, 48)));
    let timeline = Timeline {
        ids: (1_000..1_200).collect(),
    };
    let mut c = Controller::new(options, timeline, Ids::default(), Viewport);
    let mut now_ms = 0;
    c.realizer_mut().realize_page();
    idle(&mut c, &mut now_ms);

    c.on_scroll(4_820);
    c.end_scroll_gesture();
    idle(&mut c, &mut now_ms);

    let ids = c.realizer().data().ids.clone();
    let anchor = c.capture_focus_anchor(|i| ids[i]).expect("anchor");
    println!("anchor={anchor:?}");

    // Fifty older messages arrive at the top.
    let view = c.realizer_mut();
    view.begin_notifications();
    for id in (950..1_000).rev() {
        view.data_mut().ids.insert(0, id);
        view.notify(Notification::Inserted { index: 0 });
    }
    view.end_notifications();
    idle(&mut c, &mut now_ms);

    let ids = c.realizer().data().ids.clone();
    let offset = c.apply_focus_anchor(&anchor, |k| ids.iter().position(|id| id == k));
    idle(&mut c, &mut now_ms);
    println!(
        "restored offset={offset:?} first_displayed={:?}",
        c.realizer().window_state().first_displayed
    );
}
