use anyhow::Context;
use palmshot::{
    capture::{worker::CaptureWorker, Screenshotter},
    config::Config,
    gui,
    hand::landmarker::OnnxLandmarker,
    pipeline::{FrameSink, GestureLoop, Headless},
    trigger::PalmFistTrigger,
    video::webcam::{ParamPreference, Webcam, WebcamOptions},
};

const WINDOW_TITLE: &str = "Hand Gesture Recognition";

const DEFAULT_FPS: u32 = 30;

fn main() -> anyhow::Result<()> {
    palmshot::init_logger!();

    let config = Config::from_env()?;
    if config.is_headless() {
        return app(&config, Headless);
    }

    gui::run(move || app(&config, gui::Window::new(WINDOW_TITLE)))
}

fn app<K: FrameSink>(config: &Config, sink: K) -> anyhow::Result<()> {
    let mut landmarker = OnnxLandmarker::load(config.hand_model_path())
        .context("failed to load hand landmark network (set `PALMSHOT_HAND_MODEL` to its path)")?;
    landmarker.set_min_detection_confidence(config.detection_confidence());
    landmarker.set_min_tracking_confidence(config.tracking_confidence());

    let mut screenshotter = Screenshotter::system(config.screenshot_dir(), config.use_clipboard());
    if config.shows_preview() {
        screenshotter = screenshotter.with_viewer(Box::new(gui::ScreenshotPreview));
    }
    let capture = CaptureWorker::spawn(screenshotter, config.delay())?;

    let webcam = Webcam::open(
        WebcamOptions::default()
            .resolution(640, 480)
            .fps(config.webcam_fps().unwrap_or(DEFAULT_FPS))
            .prefer(ParamPreference::Framerate),
    )?;

    let trigger = PalmFistTrigger::new(config.palm_confirm_frames());
    GestureLoop::new(webcam, landmarker, capture, sink, trigger)
        .mirror(config.is_mirrored())
        .run()
}
