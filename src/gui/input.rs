use eframe::egui;

use crate::state::InputIntent;
use crate::workset::Category;

/// Key bindings for single-press actions.
pub(super) fn intent_for_key(key: egui::Key) -> Option<InputIntent> {
    use egui::Key;
    let intent = match key {
        Key::ArrowRight | Key::Space => InputIntent::NextItem,
        Key::ArrowLeft | Key::Backspace => InputIntent::PrevItem,
        Key::A => InputIntent::Categorize(Category::A),
        Key::F => InputIntent::Categorize(Category::F),
        Key::R => InputIntent::Categorize(Category::R),
        Key::P | Key::Enter => InputIntent::Play,
        Key::Q | Key::Escape => InputIntent::Quit,
        _ => return None,
    };
    Some(intent)
}

/// Wheel down steps forward, wheel up steps back. One step per frame.
pub(super) fn intent_for_scroll(delta_y: f32) -> Option<InputIntent> {
    if delta_y < 0.0 {
        Some(InputIntent::NextItem)
    } else if delta_y > 0.0 {
        Some(InputIntent::PrevItem)
    } else {
        None
    }
}

/// Translate this frame's input into intents.
///
/// Shift is the batch modifier: its press and release are edges tracked in
/// `batch_held`. A release is emitted after the frame's other intents so a
/// categorize pressed in the same frame still sees the batch.
pub(super) fn collect_intents(ctx: &egui::Context, batch_held: &mut bool) -> Vec<InputIntent> {
    let mut intents = Vec::new();
    let shift = ctx.input(|i| i.modifiers.shift);

    if shift && !*batch_held {
        *batch_held = true;
        intents.push(InputIntent::BatchStart);
    }

    ctx.input(|i| {
        for event in &i.events {
            if let egui::Event::Key { key, pressed: true, repeat, .. } = event {
                // Holding a sort key must not chew through the folder.
                let intent = intent_for_key(*key);
                if *repeat && matches!(intent, Some(InputIntent::Categorize(_))) {
                    continue;
                }
                intents.extend(intent);
            }
        }
        intents.extend(intent_for_scroll(i.raw_scroll_delta.y));
    });

    if !shift && *batch_held {
        *batch_held = false;
        intents.push(InputIntent::BatchEnd);
    }
    intents
}
