// Example: a controller tweening to an item without holding any UI objects.
//
// A host would:
// - start a tween (e.g. in response to a "scroll to item" command)
// - call tick(now_ms) once per frame
// - mirror Frame::scroll_to into the real scroll container
use virtualview::{
    Align, Bounds, DataSource, Entity, ItemMetrics, ItemRequest, LayoutKind, Measurer,
    PumpStatus, RecordHandle, Renderer, RequestId, Size, ViewOptions, VisualId, VisualTransform,
};
use virtualview_adapter::{Controller, Easing};

struct Rows(usize);

impl DataSource for Rows {
    fn count(&self) -> usize {
        self.0
    }

    fn request_item(&mut self, index: usize) -> ItemRequest {
        ItemRequest::Ready(RecordHandle(index as u64))
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
        Size::new(400, 640)
    }

    fn create_surface(&mut self) {}

    fn remove_surface(&mut self) {}

    fn measure(&mut self, _visual: VisualId) -> Option<ItemMetrics> {
        None
    }
}

fn main() {
    let options = ViewOptions::new(LayoutKind::List).with_item_size(Some(Size::new(400, 32)));
    let mut c = Controller::new(options, Rows(10_000), Ids::default(), Viewport);
    c.realizer_mut().realize_page();

    let mut now_ms = 0u64;
    while c.tick(now_ms).expect("tick").status == PumpStatus::Busy {
        now_ms += 16;
    }
    c.render_complete();

    let target = c.start_tween_to_entity(
        Entity::item(2_000),
        Align::Center,
        now_ms,
        240,
        Easing::SmoothStep,
    );
    println!("target_offset={target:?}");

    loop {
        now_ms += 16;
        let frame = c.tick(now_ms).expect("tick");
        if let Some(offset) = frame.scroll_to {
            println!(
                "t={now_ms} offset={offset} window={:?}",
                c.realizer().window_state()
            );
        }
        if !c.is_animating() && frame.status == PumpStatus::Idle {
            c.render_complete();
            break;
        }
    }

    println!(
        "done: offset={} state={:?}",
        c.realizer().scroll_offset(),
        c.realizer().state()
    );
}
