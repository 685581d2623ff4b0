// Diagnostic overlays: one PNG per (member, valid time) showing how each object
// was classified. Hits are green, unmatched truth blue and unmatched forecast red;
// where a forecast cell sits on a truth cell the two colours are mixed.

pub mod image_helper {
    use crate::core_modules::matcher::{ForecastOutcome, MatchResult, TruthOutcome};
    use crate::core_modules::storm_object::StormObject;
    use image::ImageEncoder;
    use std::path::Path;

    const HIT: [u8; 4] = [40, 200, 60, 255];
    const TRUTH_UNMATCHED: [u8; 4] = [40, 90, 230, 255];
    const FORECAST_UNMATCHED: [u8; 4] = [230, 50, 40, 255];
    const BACKGROUND: [u8; 4] = [0, 0, 0, 255];

    /// Renders an RGBA buffer of `rows` × `cols` pixels.
    pub fn render_match_overlay(
        rows: usize,
        cols: usize,
        truth: &[StormObject],
        forecast: &[StormObject],
        result: &MatchResult,
    ) -> Vec<u8> {
        let mut buffer: Vec<u8> = BACKGROUND.repeat(rows * cols);

        let mut paint = |obj: &StormObject, colour: [u8; 4]| {
            for p in &obj.coords {
                if p.row < 0 || p.col < 0 || p.row as usize >= rows || p.col as usize >= cols {
                    continue;
                }
                let i = (p.row as usize * cols + p.col as usize) * 4;
                let px = &mut buffer[i..i + 4];
                let blank = px == BACKGROUND;
                for (dst, src) in px.iter_mut().zip(colour) {
                    *dst = if blank { src } else { ((*dst as u16 + src as u16) / 2) as u8 };
                }
            }
        };

        for (obj, outcome) in truth.iter().zip(&result.truth) {
            let colour = match outcome {
                TruthOutcome::Hit { .. } => HIT,
                _ => TRUTH_UNMATCHED,
            };
            paint(obj, colour);
        }
        for (obj, outcome) in forecast.iter().zip(&result.forecast) {
            let colour = match outcome {
                ForecastOutcome::Hit { .. } => HIT,
                _ => FORECAST_UNMATCHED,
            };
            paint(obj, colour);
        }

        buffer
    }

    pub fn save(path: &Path, width: u32, height: u32, buffer: &[u8]) -> Result<(), image::ImageError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let output = std::fs::File::create(path)?;
        let encoder = image::codecs::png::PngEncoder::new(output);
        encoder.write_image(buffer, width, height, image::ExtendedColorType::Rgba8)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::image_helper::*;
    use crate::core_modules::interest::InterestParams;
    use crate::core_modules::matcher::{MatchParams, match_objects};
    use crate::core_modules::storm_object::test_shapes::centered;

    #[test]
    fn overlay_colours_outcomes() {
        let truth = vec![centered(1, 5, 5, 3), centered(2, 15, 15, 1)];
        let forecast = vec![centered(1, 5, 5, 3)];
        let params = MatchParams {
            interest: InterestParams::new(4.0, 4.0),
            ti_thresh: 0.2,
            max_iterations: 5,
        };
        let result = match_objects(&truth, &forecast, &params);
        let buffer = render_match_overlay(20, 20, &truth, &forecast, &result);

        let at = |r: usize, c: usize| &buffer[(r * 20 + c) * 4..(r * 20 + c) * 4 + 4];
        assert_eq!(at(5, 5), &[40, 200, 60, 255]);
        assert_eq!(at(15, 15), &[40, 90, 230, 255]);
        assert_eq!(at(0, 0), &[0, 0, 0, 255]);
    }

    #[test]
    fn save_overlay_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("overlay.png");
        let buffer = vec![255u8; 8 * 6 * 4];
        save(&path, 8, 6, &buffer).expect("Error Saving File.");
        let decoded = image::open(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 6));
    }
}
