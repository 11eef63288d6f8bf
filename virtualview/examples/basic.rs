// Example: a million-item grid driven by a frame loop, then a scroll and an insertion.
use virtualview::{
    Bounds, DataSource, ItemMetrics, ItemRequest, LayoutKind, Measurer, Notification, PumpStatus,
    Realizer, RecordHandle, Renderer, RequestId, Size, ViewEvent, ViewOptions, VisualId,
    VisualTransform,
};

struct Numbers {
    count: usize,
}

impl DataSource for Numbers {
    fn count(&self) -> usize {
        self.count
    }

    fn request_item(&mut self, index: usize) -> ItemRequest {
        ItemRequest::Ready(RecordHandle(index as u64))
    }

    fn cancel_request(&mut self, _request: RequestId) {}

    fn release_item(&mut self, _record: RecordHandle) {}
}

#[derive(Default)]
struct Canvas {
    next: u64,
    live: usize,
}

impl Renderer for Canvas {
    fn render_item(&mut self, _index: usize, _record: RecordHandle) -> VisualId {
        self.next += 1;
        self.live += 1;
        VisualId(self.next)
    }

    fn render_header(&mut self, _group: usize, _key: u64) -> VisualId {
        self.next += 1;
        self.live += 1;
        VisualId(self.next)
    }

    fn place(&mut self, _visual: VisualId, _bounds: Bounds) {}

    fn apply_transform(&mut self, _visual: VisualId, _transform: VisualTransform) {}

    fn remove(&mut self, _visual: VisualId) {
        self.live -= 1;
    }
}

struct Window;

impl Measurer for Window {
    fn viewport(&self) -> Size {
        Size::new(800, 600)
    }

    fn create_surface(&mut self) {}

    fn remove_surface(&mut self) {}

    fn measure(&mut self, _visual: VisualId) -> Option<ItemMetrics> {
        None
    }
}

fn run(view: &mut Realizer<Numbers, Canvas, Window>, now_ms: &mut u64) {
    loop {
        *now_ms += 16;
        let status = view.pump(*now_ms).expect("pump");
        for event in view.drain_events() {
            if let ViewEvent::StateChanged { from, to } = event {
                println!("t={now_ms} {from:?} -> {to:?}");
            }
        }
        if status == PumpStatus::Idle {
            view.render_complete();
            return;
        }
    }
}

fn main() {
    let options = ViewOptions::new(LayoutKind::Grid { max_slots: None })
        .with_item_size(Some(Size::new(160, 120)));
    let mut view = Realizer::new(
        options,
        Numbers { count: 1_000_000 },
        Canvas::default(),
        Window,
    );
    let mut now_ms = 0;

    view.realize_page();
    run(&mut view, &mut now_ms);
    println!(
        "total_extent={} window={:?} live={}",
        view.total_extent(),
        view.window_state(),
        view.renderer().live
    );

    view.on_scroll(250_000);
    view.end_scroll_gesture();
    run(&mut view, &mut now_ms);
    println!("after scroll: window={:?}", view.window_state());

    view.data_mut().count += 1;
    view.notify(Notification::Inserted { index: 0 });
    run(&mut view, &mut now_ms);
    println!(
        "after insert: total_extent={} live={}",
        view.total_extent(),
        view.renderer().live
    );
}
