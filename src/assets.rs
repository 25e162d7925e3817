use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use unicode_categories::UnicodeCategories;

use crate::ranking::Match;
use crate::reference::{MapName, MapStore, PlaceEntry, ReferenceError};

/// Response payload for a located screenshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchAssets {
    /// Place records per match, in match order.
    pub coordinates: Vec<Vec<PlaceEntry>>,
    /// Base64 images: detail then whole map, for each match in turn.
    pub image_data: Vec<String>,
}

/// Name of the whole-map image that a detail image belongs to: the detail
/// name with every decimal digit removed (`A12.png` -> `A.png`). Any Unicode
/// `Nd` digit counts, full-width and Arabic-Indic included.
pub fn whole_map_name(name: &str) -> String {
    name.chars().filter(|c| !c.is_number_decimal_digit()).collect()
}

pub fn encode_image(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Load the images and place records for each match. Any missing file fails
/// the whole assembly.
pub fn assemble(store: &MapStore, map: &MapName, matches: &[Match]) -> Result<MatchAssets, ReferenceError> {
    let places = store.load_places(map)?;

    let mut assets = MatchAssets::default();
    for m in matches {
        let detail = store.read_image(map, &m.name)?;
        assets.image_data.push(encode_image(&detail));

        let whole = store.read_image(map, &whole_map_name(&m.name))?;
        assets.image_data.push(encode_image(&whole));

        let records: Vec<PlaceEntry> = places.iter().filter(|p| p.name == m.name).cloned().collect();
        if records.is_empty() {
            tracing::warn!(map = %map, name = %m.name, "no place record for matched image");
        }
        assets.coordinates.push(records);
    }

    Ok(assets)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use serde_json::json;

    use super::*;

    fn write(root: &Path, rel: &str, bytes: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }

    fn matched(name: &str, distance: u32) -> Match {
        Match {
            name: name.into(),
            distance,
        }
    }

    #[test]
    fn test_whole_map_name_strips_digits() {
        assert_eq!(whole_map_name("A1.png"), "A.png");
        assert_eq!(whole_map_name("north12b3.jpg"), "northb.jpg");
        assert_eq!(whole_map_name("湖畔２.png"), "湖畔.png");
        assert_eq!(whole_map_name("plain.png"), "plain.png");
    }

    #[test]
    fn test_whole_map_name_strips_every_decimal_digit() {
        // Arabic-Indic, Devanagari and Mathematical bold digits are all Nd.
        assert_eq!(whole_map_name("A\u{0663}\u{096A}.png"), "A.png");
        assert_eq!(whole_map_name("B\u{1D7D0}.png"), "B.png");
        // Superscripts and Roman numerals are numbers but not decimal digits.
        assert_eq!(whole_map_name("C\u{00B2}\u{2163}.png"), "C\u{00B2}\u{2163}.png");
    }

    #[test]
    fn test_base64_round_trip() {
        let bytes: Vec<u8> = (0..=255u8).chain([0, 0, 1]).collect();
        let encoded = encode_image(&bytes);
        assert_eq!(STANDARD.decode(encoded).unwrap(), bytes);
    }

    #[test]
    fn test_assemble_orders_detail_then_whole() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "map_image/m/A1.png", b"detail-a1");
        write(root, "map_image/m/A.png", b"whole-a");
        write(root, "map_image/m/B2.png", b"detail-b2");
        write(root, "map_image/m/B.png", b"whole-b");
        write(
            root,
            "map_place/map_place_m.json",
            br#"[
                {"name": "B2.png", "x": 3, "y": 4},
                {"name": "A1.png", "x": 1, "y": 2},
                {"name": "A1.png", "x": 9, "y": 9}
            ]"#,
        );

        let store = MapStore::new(root);
        let map = MapName::parse("m").unwrap();
        let assets = assemble(&store, &map, &[matched("A1.png", 1), matched("B2.png", 5)]).unwrap();

        let expected: Vec<String> = ["detail-a1", "whole-a", "detail-b2", "whole-b"]
            .iter()
            .map(|s| encode_image(s.as_bytes()))
            .collect();
        assert_eq!(assets.image_data, expected);

        let body = serde_json::to_value(&assets.coordinates).unwrap();
        assert_eq!(
            body,
            json!([
                [{"name": "A1.png", "x": 1, "y": 2}, {"name": "A1.png", "x": 9, "y": 9}],
                [{"name": "B2.png", "x": 3, "y": 4}]
            ])
        );
    }

    #[test]
    fn test_match_without_place_record_gets_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "map_image/m/C3.png", b"c3");
        write(root, "map_image/m/C.png", b"c");
        write(root, "map_place/map_place_m.json", b"[]");

        let assets = assemble(
            &MapStore::new(root),
            &MapName::parse("m").unwrap(),
            &[matched("C3.png", 0)],
        )
        .unwrap();
        assert_eq!(assets.coordinates, vec![Vec::<PlaceEntry>::new()]);
        assert_eq!(assets.image_data.len(), 2);
    }

    #[test]
    fn test_missing_whole_map_image_fails() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "map_image/m/A1.png", b"a1");
        write(root, "map_place/map_place_m.json", b"[]");

        let err = assemble(
            &MapStore::new(root),
            &MapName::parse("m").unwrap(),
            &[matched("A1.png", 0)],
        )
        .unwrap_err();
        assert!(matches!(err, ReferenceError::MissingImage { .. }));
    }

    #[test]
    fn test_no_matches_yields_empty_payload() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "map_place/map_place_m.json", b"[]");
        let assets = assemble(&MapStore::new(dir.path()), &MapName::parse("m").unwrap(), &[]).unwrap();
        assert_eq!(assets, MatchAssets::default());
    }
}
