//! Full-screen screenshots, their files, and the clipboard.
//!
//! A [`Screenshotter`] combines a [`ScreenGrabber`] and a [`ScreenshotStore`], plus an optional
//! [`ClipboardSink`] and [`ScreenshotViewer`]. The frame loop never uses it directly; it goes through a
//! [`worker::CaptureWorker`] so that the capture delay does not stall the camera.

pub mod worker;

use std::{
    borrow::Cow,
    fs,
    path::PathBuf,
};

use anyhow::{anyhow, Context};
use chrono::{Local, NaiveDateTime};
use image::{ImageFormat, RgbaImage};

/// Something that can take a picture of the whole display.
pub trait ScreenGrabber: Send {
    fn grab(&mut self) -> anyhow::Result<RgbaImage>;
}

/// Something that can hold an image for pasting elsewhere.
pub trait ClipboardSink: Send {
    fn set_image(&mut self, image: &RgbaImage) -> anyhow::Result<()>;
}

/// Something that shows a screenshot to the user after it was saved.
pub trait ScreenshotViewer: Send {
    fn view(&mut self, screenshot: &Screenshot) -> anyhow::Result<()>;
}

/// Grabs the primary monitor with `xcap`.
#[derive(Debug, Default)]
pub struct XcapScreen;

impl ScreenGrabber for XcapScreen {
    fn grab(&mut self) -> anyhow::Result<RgbaImage> {
        let monitors =
            xcap::Monitor::all().map_err(|e| anyhow!("failed to list monitors: {e}"))?;
        let monitor = monitors
            .iter()
            .find(|monitor| monitor.is_primary())
            .or_else(|| monitors.first())
            .ok_or_else(|| anyhow!("no monitors found"))?;

        let image = monitor
            .capture_image()
            .map_err(|e| anyhow!("screen capture of '{}' failed: {e}", monitor.name()))?;
        let (width, height) = (image.width(), image.height());
        RgbaImage::from_raw(width, height, image.into_raw())
            .ok_or_else(|| anyhow!("screen capture returned a truncated {width}x{height} image"))
    }
}

/// The system clipboard, accessed through `arboard`.
///
/// The clipboard connection is opened on first use, so it lives on the thread that uses it.
#[derive(Default)]
pub struct SystemClipboard {
    clipboard: Option<arboard::Clipboard>,
}

impl SystemClipboard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClipboardSink for SystemClipboard {
    fn set_image(&mut self, image: &RgbaImage) -> anyhow::Result<()> {
        let clipboard = match &mut self.clipboard {
            Some(clipboard) => clipboard,
            None => self.clipboard.insert(
                arboard::Clipboard::new().context("failed to open the system clipboard")?,
            ),
        };
        clipboard
            .set_image(arboard::ImageData {
                width: image.width() as usize,
                height: image.height() as usize,
                bytes: Cow::Borrowed(image.as_raw()),
            })
            .context("failed to copy screenshot to the clipboard")
    }
}

/// Writes numbered screenshot files into a directory.
///
/// Files are named `screenshot_<YYYYMMDD_HHMMSS>_<counter>.png`. The counter starts at 0 for every
/// store and only advances when a file was written successfully.
#[derive(Debug)]
pub struct ScreenshotStore {
    dir: PathBuf,
    counter: u32,
}

impl ScreenshotStore {
    /// Creates a store writing to `dir`.
    ///
    /// The directory is created on the first save if it does not exist.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            counter: 0,
        }
    }

    /// Returns the path the next screenshot would be written to, if it was taken at `time`.
    pub fn path_for(&self, time: NaiveDateTime) -> PathBuf {
        self.dir.join(format!(
            "screenshot_{}_{}.png",
            time.format("%Y%m%d_%H%M%S"),
            self.counter,
        ))
    }

    /// Saves `image` as PNG, returning the path of the written file.
    pub fn save(&mut self, image: &RgbaImage) -> anyhow::Result<PathBuf> {
        self.save_at(image, Local::now().naive_local())
    }

    fn save_at(&mut self, image: &RgbaImage, time: NaiveDateTime) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create '{}'", self.dir.display()))?;
        let path = self.path_for(time);
        image
            .save_with_format(&path, ImageFormat::Png)
            .with_context(|| format!("failed to write '{}'", path.display()))?;
        self.counter += 1;
        Ok(path)
    }
}

/// A screenshot that was saved to disk.
#[derive(Debug)]
pub struct Screenshot {
    pub path: PathBuf,
    pub image: RgbaImage,
}

/// Takes, saves and shares full-screen screenshots.
pub struct Screenshotter {
    grabber: Box<dyn ScreenGrabber>,
    store: ScreenshotStore,
    clipboard: Option<Box<dyn ClipboardSink>>,
    viewer: Option<Box<dyn ScreenshotViewer>>,
}

impl Screenshotter {
    pub fn new(grabber: Box<dyn ScreenGrabber>, store: ScreenshotStore) -> Self {
        Self {
            grabber,
            store,
            clipboard: None,
            viewer: None,
        }
    }

    /// Also copies every screenshot to `clipboard`.
    pub fn with_clipboard(mut self, clipboard: Box<dyn ClipboardSink>) -> Self {
        self.clipboard = Some(clipboard);
        self
    }

    /// Also shows every saved screenshot with `viewer`.
    pub fn with_viewer(mut self, viewer: Box<dyn ScreenshotViewer>) -> Self {
        self.viewer = Some(viewer);
        self
    }

    /// Creates a screenshotter for the primary monitor and the system clipboard.
    pub fn system(dir: impl Into<PathBuf>, clipboard: bool) -> Self {
        let this = Self::new(Box::new(XcapScreen), ScreenshotStore::new(dir));
        if clipboard {
            this.with_clipboard(Box::new(SystemClipboard::new()))
        } else {
            this
        }
    }

    /// Captures the whole display and saves it. Then copies it to the clipboard and shows it,
    /// if a clipboard or viewer is set.
    pub fn capture_full_screen(&mut self) -> anyhow::Result<Screenshot> {
        let image = self.grabber.grab()?;
        let path = self.store.save(&image)?;
        log::info!("screenshot saved: {}", path.display());

        if let Some(clipboard) = &mut self.clipboard {
            clipboard.set_image(&image)?;
            log::info!("screenshot copied to clipboard");
        }

        let screenshot = Screenshot { path, image };
        if let Some(viewer) = &mut self.viewer {
            viewer.view(&screenshot)?;
        }
        Ok(screenshot)
    }
}
