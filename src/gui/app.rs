use std::sync::Arc;
use std::time::{Duration, Instant};

use eframe::egui;

use super::APP_TITLE;
use super::image::{ResizeSettler, TextureCache, render_texture, target_for_rect};
use super::input::collect_intents;
use crate::context::AppContext;
use crate::state::{CurrentView, InputIntent, ViewerState};

const STATUS_TIMEOUT: Duration = Duration::from_secs(3);
const MIN_WINDOW_SIZE: [f32; 2] = [800.0, 600.0];

pub struct GuiApp {
    state: ViewerState,
    ctx: Arc<AppContext>,
    textures: TextureCache,
    resize: ResizeSettler,
    poll_interval: Duration,

    batch_held: bool,
    initial_scale_applied: bool,
    status_set_time: Option<Instant>,
    // Physical pixels, saved on exit
    last_window_size: Option<(u32, u32)>,
    closing: bool,
}

impl GuiApp {
    pub fn new(ctx: Arc<AppContext>, state: ViewerState) -> Self {
        let gui = &ctx.config.gui;
        let settle = Duration::from_millis(gui.resize_settle_ms.unwrap_or(150));
        let poll_interval = Duration::from_millis(ctx.config.pipeline.poll_interval_ms.max(1));
        let last_window_size = gui.width.zip(gui.height);

        Self {
            state,
            ctx,
            textures: TextureCache::default(),
            resize: ResizeSettler::new(settle),
            poll_interval,
            batch_held: false,
            initial_scale_applied: false,
            status_set_time: None,
            last_window_size,
            closing: false,
        }
    }

    pub fn run(self) -> Result<(), eframe::Error> {
        // Window size is stored in physical pixels; ppp is 1.0 before font scaling.
        let width = self.ctx.config.gui.width.unwrap_or(1280) as f32;
        let height = self.ctx.config.gui.height.unwrap_or(800) as f32;

        let options = eframe::NativeOptions {
            viewport: egui::ViewportBuilder::default()
                .with_inner_size([width, height])
                .with_min_inner_size(MIN_WINDOW_SIZE)
                .with_title(APP_TITLE),
            ..Default::default()
        };

        eframe::run_native(APP_TITLE, options, Box::new(move |_cc| Ok(Box::new(self))))
    }

    fn title(&self) -> String {
        match self.state.current_pair() {
            Some(pair) => format!("{} | {}", APP_TITLE, pair.video_name()),
            None => APP_TITLE.to_string(),
        }
    }

    fn save_window_size(&self) {
        let Some((w, h)) = self.last_window_size else {
            log::debug!("No window size captured");
            return;
        };
        let mut gui_config = self.ctx.config.gui.clone();
        gui_config.width = Some(w);
        gui_config.height = Some(h);
        if let Err(e) = self.ctx.save_gui_config(&gui_config) {
            log::warn!("Error saving config: {:#}", e);
        }
    }

    fn dispatch(&mut self, intent: InputIntent) {
        let before = self.state.status_message.clone();
        self.state.handle_input(intent);
        if self.state.status_message.is_some() && self.state.status_message != before {
            self.status_set_time = Some(Instant::now());
        }
    }

    fn begin_close(&mut self, ctx: &egui::Context) {
        if self.closing {
            return;
        }
        self.closing = true;
        self.state.close();
        self.save_window_size();
        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
    }

    fn track_window_size(&mut self, ctx: &egui::Context) {
        let ppp = ctx.pixels_per_point();
        let size = ctx.input(|i| {
            i.viewport()
                .inner_rect
                .map(|r| ((r.width() * ppp) as u32, (r.height() * ppp) as u32))
        });
        let maximized = ctx.input(|i| i.viewport().maximized.unwrap_or(false));
        if let Some(size) = size
            && size.0 > 100
            && size.1 > 100
            && !maximized
        {
            self.last_window_size = Some(size);
        }
    }
}

impl eframe::App for GuiApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if !self.initial_scale_applied {
            let user_scale = self.ctx.config.gui.font_scale.unwrap_or(1.0);
            ctx.set_pixels_per_point(ctx.pixels_per_point() * user_scale);
            self.initial_scale_applied = true;
        }

        if let Some(set_time) = self.status_set_time
            && set_time.elapsed() > STATUS_TIMEOUT
            && !matches!(self.state.status_message, Some((_, true)))
        {
            self.state.status_message = None;
            self.status_set_time = None;
        }

        if self.state.tick() {
            ctx.request_repaint();
        }

        for intent in collect_intents(ctx, &mut self.batch_held) {
            self.dispatch(intent);
        }

        if self.state.exit_requested || ctx.input(|i| i.viewport().close_requested()) {
            self.begin_close(ctx);
            return;
        }

        ctx.send_viewport_cmd(egui::ViewportCommand::Title(self.title()));

        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if self.state.is_batch_active() {
                    ui.colored_label(egui::Color32::YELLOW, "BATCH");
                }
                ui.label(self.state.status_line());
            });
            if let Some((msg, is_error)) = &self.state.status_message {
                ui.colored_label(if *is_error { egui::Color32::RED } else { egui::Color32::GREEN }, msg);
            }
            ui.small("←/→ or wheel navigate · A/F/R sort · hold Shift to batch · P play · Q quit");
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            let available_rect = ui.available_rect_before_wrap();

            let observed = target_for_rect(available_rect, ctx.pixels_per_point());
            if let Some(size) = self.resize.observe(observed, self.state.target(), Instant::now()) {
                self.dispatch(InputIntent::Resize(size));
            }

            match self.state.current_view() {
                CurrentView::Empty => {
                    ui.centered_and_justified(|ui| ui.heading("All files processed!"));
                }
                CurrentView::Loading(pair) => {
                    let name = pair.video_name();
                    ui.centered_and_justified(|ui| {
                        ui.spinner();
                        ui.label(format!("Loading {}...", name));
                    });
                }
                CurrentView::Unavailable(pair, reason) => {
                    let text = format!("Preview unavailable for {}\n{}", pair.video_name(), reason);
                    ui.centered_and_justified(|ui| ui.colored_label(egui::Color32::LIGHT_RED, text));
                }
                CurrentView::Ready(pair, img) => {
                    let texture = self.textures.get_or_upload(ctx, &pair.video_path, img);
                    render_texture(ui, texture, available_rect);
                }
            }
        });

        self.textures.sync(&self.state);
        self.track_window_size(ctx);

        if self.resize.is_waiting() {
            ctx.request_repaint_after(self.resize.settle());
        }
        if self.state.has_pending_work() {
            ctx.request_repaint_after(self.poll_interval);
        }
    }
}
