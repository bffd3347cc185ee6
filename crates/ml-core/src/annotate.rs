//! CPU box-and-label overlay drawn straight into the frame buffer.

use video_ingest::Frame;

use crate::{
    analyzer::{AnalysisError, Annotator},
    detection::DetectionSummary,
};

const GLYPH_ADVANCE: i32 = 6;
const GLYPH_HEIGHT: i32 = 7;

/// Draws a rectangle and a `LABEL 87%` tag for every detection, plus a frame
/// counter in the bottom-right corner.
#[derive(Clone, Debug)]
pub struct BoxAnnotator {
    pub box_colour: [u8; 3],
    pub text_colour: [u8; 3],
    pub tag_background: [u8; 3],
    pub line_thickness: u32,
    pub show_frame_number: bool,
}

impl Default for BoxAnnotator {
    fn default() -> Self {
        Self {
            box_colour: [0, 255, 0],
            text_colour: [0, 255, 0],
            tag_background: [0, 0, 0],
            line_thickness: 2,
            show_frame_number: true,
        }
    }
}

impl Annotator for BoxAnnotator {
    fn annotate(&self, mut frame: Frame, summary: &DetectionSummary) -> Result<Frame, AnalysisError> {
        let expected = Frame::byte_len(frame.width, frame.height, frame.format);
        if frame.data.len() != expected {
            return Err(AnalysisError::Annotation(format!(
                "frame buffer holds {} bytes, expected {expected}",
                frame.data.len()
            )));
        }
        if frame.width == 0 || frame.height == 0 {
            return Ok(frame);
        }

        for det in summary.iter() {
            let [left, top, right, bottom] = det.region.to_pixels(frame.width, frame.height);
            for inset in 0..self.line_thickness as i32 {
                draw_rectangle(
                    &mut frame,
                    left + inset,
                    top + inset,
                    right - inset,
                    bottom - inset,
                    self.box_colour,
                );
            }
        }

        for det in summary.iter() {
            let [left, top, _, _] = det.region.to_pixels(frame.width, frame.height);
            let label = format!("{} {:.0}%", det.category, det.confidence * 100.0);
            let label_y = (top - GLYPH_HEIGHT - 5).max(0);
            let text_width = label.chars().count() as i32 * GLYPH_ADVANCE;
            fill_rect(
                &mut frame,
                left,
                label_y,
                left + text_width + 2,
                label_y + GLYPH_HEIGHT + 2,
                self.tag_background,
            );
            draw_label(&mut frame, left + 1, label_y + 1, &label, self.text_colour);
        }

        if self.show_frame_number {
            let info = format!("FRAME {:06}", frame.sequence);
            let width = frame.width as i32;
            let height = frame.height as i32;
            let info_width = (info.chars().count() as i32 * GLYPH_ADVANCE).min(width);
            let info_x = (width - info_width - 4).max(0);
            let info_y = (height - GLYPH_HEIGHT - 4).max(0);
            fill_rect(
                &mut frame,
                info_x,
                info_y,
                info_x + info_width + 4,
                info_y + GLYPH_HEIGHT + 2,
                self.tag_background,
            );
            draw_label(&mut frame, info_x + 2, info_y + 1, &info, [255, 255, 255]);
        }

        Ok(frame)
    }
}

fn put_pixel(frame: &mut Frame, x: i32, y: i32, colour: [u8; 3]) {
    if x >= 0 && y >= 0 && (x as u32) < frame.width && (y as u32) < frame.height {
        frame.set_rgb(x as u32, y as u32, colour);
    }
}

fn draw_rectangle(frame: &mut Frame, left: i32, top: i32, right: i32, bottom: i32, colour: [u8; 3]) {
    if right < left || bottom < top {
        return;
    }
    for x in left..=right {
        put_pixel(frame, x, top, colour);
        put_pixel(frame, x, bottom, colour);
    }
    for y in top..=bottom {
        put_pixel(frame, left, y, colour);
        put_pixel(frame, right, y, colour);
    }
}

fn fill_rect(frame: &mut Frame, left: i32, top: i32, right: i32, bottom: i32, colour: [u8; 3]) {
    let width = frame.width as i32;
    let height = frame.height as i32;
    let left = left.clamp(0, width - 1);
    let right = right.clamp(0, width - 1);
    let top = top.clamp(0, height - 1);
    let bottom = bottom.clamp(0, height - 1);

    for y in top..=bottom {
        for x in left..=right {
            frame.set_rgb(x as u32, y as u32, colour);
        }
    }
}

fn draw_label(frame: &mut Frame, mut x: i32, y: i32, text: &str, colour: [u8; 3]) {
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 1 {
                        put_pixel(frame, x + col, y + row as i32, colour);
                    }
                }
            }
        }
        x += GLYPH_ADVANCE;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '%' => [0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0b00000],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(rows)
}
