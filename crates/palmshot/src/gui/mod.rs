//! A simple preview window.
//!
//! winit requires the event loop to run on the main thread, so [`run`] takes over the main thread
//! and runs the application on a second one. Images passed to [`show_image`] are sent to the event
//! loop and displayed in a window per key.
//!
//! Closing a window opened by [`show_image`] quits the application. Windows opened by
//! [`show_dismissable_image`] just close.

mod renderer;

use std::{
    collections::{HashMap, HashSet},
    panic::{catch_unwind, AssertUnwindSafe},
    process,
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, OnceLock,
    },
    thread,
};

use anyhow::bail;
use image::{imageops, RgbaImage};
use winit::{
    event::{ElementState, Event, KeyboardInput, VirtualKeyCode, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopBuilder, EventLoopProxy},
    window::WindowId,
};

use crate::{
    capture::{Screenshot, ScreenshotViewer},
    pipeline::FrameSink,
};

use self::renderer::{Gpu, Renderer};

/// Set when the user asked to quit by pressing `Q` or closing a window.
static QUIT: AtomicBool = AtomicBool::new(false);

/// Set when the event loop failed to display an image.
static FAILED: AtomicBool = AtomicBool::new(false);

static PROXY: OnceLock<Mutex<EventLoopProxy<Msg>>> = OnceLock::new();

#[derive(Debug)]
enum Msg {
    Image {
        key: String,
        width: u32,
        height: u32,
        data: Vec<u8>,
        dismissable: bool,
    },
}

struct Gui {
    gpu: Rc<Gpu>,
    windows: HashMap<String, Renderer>,
    win_id_to_key: HashMap<WindowId, String>,
    dismissable: HashSet<WindowId>,
}

impl Gui {
    fn new(gpu: Gpu) -> Self {
        Self {
            gpu: Rc::new(gpu),
            windows: HashMap::new(),
            win_id_to_key: HashMap::new(),
            dismissable: HashSet::new(),
        }
    }

    fn close(&mut self, id: WindowId) {
        self.dismissable.remove(&id);
        if let Some(key) = self.win_id_to_key.remove(&id) {
            log::debug!("closing window '{key}'");
            self.windows.remove(&key);
        }
    }

    fn run(mut self, event_loop: EventLoop<Msg>) -> ! {
        event_loop.run(move |event, target, flow| {
            *flow = ControlFlow::Wait;
            match event {
                Event::UserEvent(Msg::Image {
                    key,
                    width,
                    height,
                    data,
                    dismissable,
                }) => {
                    if !self.windows.contains_key(&key) {
                        log::debug!("creating window for image '{key}' at {width}x{height}");
                        let renderer = renderer::Window::open(target, &key, width, height)
                            .and_then(|win| Renderer::new(win, self.gpu.clone()));
                        match renderer {
                            Ok(renderer) => {
                                let id = renderer.window().id();
                                self.win_id_to_key.insert(id, key.clone());
                                if dismissable {
                                    self.dismissable.insert(id);
                                }
                                self.windows.insert(key.clone(), renderer);
                            }
                            Err(e) => {
                                log::error!("failed to open window '{key}': {e:#}");
                                FAILED.store(true, Ordering::Release);
                                return;
                            }
                        }
                    }

                    if let Some(renderer) = self.windows.get_mut(&key) {
                        renderer.update_texture(width, height, &data);
                        renderer.window().request_redraw();
                    }
                }
                Event::RedrawRequested(id) => {
                    let Some(renderer) = self
                        .win_id_to_key
                        .get(&id)
                        .and_then(|key| self.windows.get_mut(key))
                    else {
                        return;
                    };
                    if let Err(e) = renderer.redraw() {
                        log::error!("failed to redraw window: {e:#}");
                        FAILED.store(true, Ordering::Release);
                    }
                }
                Event::WindowEvent {
                    window_id,
                    event: WindowEvent::CloseRequested,
                } if self.dismissable.contains(&window_id) => self.close(window_id),
                Event::WindowEvent {
                    event: WindowEvent::CloseRequested,
                    ..
                }
                | Event::WindowEvent {
                    event:
                        WindowEvent::KeyboardInput {
                            input:
                                KeyboardInput {
                                    state: ElementState::Pressed,
                                    virtual_keycode: Some(VirtualKeyCode::Q),
                                    ..
                                },
                            ..
                        },
                    ..
                } => {
                    if !QUIT.swap(true, Ordering::AcqRel) {
                        log::info!("quit requested");
                    }
                }
                _ => {}
            }
        });
    }
}

/// Runs the GUI event loop on the calling thread and `app` on a new one.
///
/// The process exits once `app` returns: with status 0 if it returned `Ok`, 1 if it returned an
/// error (which is printed), and 101 if it panicked.
///
/// This has to be called from the main thread, at most once.
pub fn run<F>(app: F) -> !
where
    F: FnOnce() -> anyhow::Result<()> + Send + 'static,
{
    let event_loop = EventLoopBuilder::with_user_event().build();
    if PROXY.set(Mutex::new(event_loop.create_proxy())).is_err() {
        panic!("`gui::run` called more than once");
    }

    // Library is now initialized; spawn another thread to run the application code.
    thread::spawn(move || match catch_unwind(AssertUnwindSafe(app)) {
        Ok(Ok(())) => process::exit(0),
        Ok(Err(e)) => {
            eprintln!("Error: {e:?}");
            process::exit(1);
        }
        // The panic hook has printed the message already; 101 mimics libstd.
        Err(_payload) => process::exit(101),
    });

    let gpu = match pollster::block_on(Gpu::open()) {
        Ok(gpu) => gpu,
        Err(e) => {
            eprintln!("Error: failed to open GPU: {e:?}");
            process::exit(1);
        }
    };
    Gui::new(gpu).run(event_loop)
}

/// Displays an image in the window titled `key`, creating it on first use.
///
/// The window is sized after the first image shown in it.
pub fn show_image(key: impl Into<String>, image: &RgbaImage) -> anyhow::Result<()> {
    send_image(key.into(), image, false)
}

/// Like [`show_image`], but closing the window only closes the window.
///
/// Showing another image under the same key reopens it.
pub fn show_dismissable_image(key: impl Into<String>, image: &RgbaImage) -> anyhow::Result<()> {
    send_image(key.into(), image, true)
}

fn send_image(key: String, image: &RgbaImage, dismissable: bool) -> anyhow::Result<()> {
    if FAILED.load(Ordering::Acquire) {
        bail!("preview window failed (see log)");
    }
    let Some(proxy) = PROXY.get() else {
        bail!("`gui::run` has not been called");
    };

    let msg = Msg::Image {
        key,
        width: image.width(),
        height: image.height(),
        data: image.as_raw().clone(),
        dismissable,
    };
    // TODO: drop frames when the event loop falls behind instead of queueing them
    let sent = proxy
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .send_event(msg);
    if sent.is_err() {
        bail!("GUI event loop has exited");
    }
    Ok(())
}

/// Returns whether the user pressed `Q` or closed a window.
pub fn quit_requested() -> bool {
    QUIT.load(Ordering::Acquire)
}

/// A [`FrameSink`] showing frames in a preview window.
pub struct Window {
    title: String,
}

impl Window {
    /// The window itself opens when the first frame is shown.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }
}

impl FrameSink for Window {
    fn show(&mut self, frame: &RgbaImage) -> anyhow::Result<()> {
        show_image(self.title.as_str(), frame)
    }

    fn quit_requested(&self) -> bool {
        quit_requested()
    }
}

/// Largest preview window, in pixels.
const PREVIEW_MAX: (u32, u32) = (960, 540);

/// A [`ScreenshotViewer`] showing a scaled-down copy of each screenshot in its own window.
#[derive(Debug, Default)]
pub struct ScreenshotPreview;

impl ScreenshotViewer for ScreenshotPreview {
    fn view(&mut self, screenshot: &Screenshot) -> anyhow::Result<()> {
        let (w, h) = screenshot.image.dimensions();
        let (pw, ph) = preview_size(w, h);
        let image = if (pw, ph) == (w, h) {
            screenshot.image.clone()
        } else {
            imageops::thumbnail(&screenshot.image, pw, ph)
        };
        show_dismissable_image("Screenshot", &image)
    }
}

/// Scales `width` x `height` down to fit into [`PREVIEW_MAX`], keeping the aspect ratio.
fn preview_size(width: u32, height: u32) -> (u32, u32) {
    let (max_w, max_h) = PREVIEW_MAX;
    if width <= max_w && height <= max_h {
        return (width, height);
    }
    let scale = f64::min(
        f64::from(max_w) / f64::from(width),
        f64::from(max_h) / f64::from(height),
    );
    let scaled = |v: u32| ((f64::from(v) * scale).round() as u32).max(1);
    (scaled(width), scaled(height))
}
