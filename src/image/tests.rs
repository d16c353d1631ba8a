use super::*;
use chrono::Duration;

#[test]
fn final_image_id_is_the_layer_digest() {
    let image = Image::new("base", vec!["aabbccdd".to_string()], "").unwrap();
    assert_eq!(image.id, "base:aabbccdd");
    assert!(image.is_final());
    assert_eq!(image.display_id(), "base:aabbccdd");
    assert_eq!(image.name(), "base");
}

#[test]
fn stacked_image_id_hashes_the_digest_list() {
    let layers = vec!["1111".to_string(), "2222".to_string()];
    let mut hasher = Sha256::new();
    hasher.update(b"1111");
    hasher.update(b"2222");
    let expected = format!("snap:{:x}", hasher.finalize());

    let image = Image::new("snap", layers, "base:1111").unwrap();
    assert_eq!(image.id, expected);
    assert!(!image.is_final());
    assert!(image.display_id().ends_with("..."));
    assert_eq!(image.parent, "base:1111");
}

#[test]
fn id_is_a_pure_function_of_name_and_layers() {
    let layers = vec!["aa".to_string(), "bb".to_string()];
    let first = generate_image_id("x", &layers).unwrap();
    let second = generate_image_id("x", &layers).unwrap();
    assert_eq!(first, second);
    assert_ne!(first, generate_image_id("y", &layers).unwrap());
}

#[test]
fn bad_image_inputs_are_rejected() {
    assert!(matches!(
        Image::new("", vec!["aa".to_string()], ""),
        Err(ImageError::IllegalName(_))
    ));
    assert!(matches!(
        Image::new("base", vec![], ""),
        Err(ImageError::NoLayers)
    ));
}

#[test]
fn history_keeps_newest_first() {
    let old = {
        let mut image = Image::new("a", vec!["11".to_string()], "").unwrap();
        image.created = image.created - Duration::hours(2);
        image
    };
    let mid = {
        let mut image = Image::new("a", vec!["22".to_string()], "").unwrap();
        image.created = image.created - Duration::hours(1);
        image
    };
    let new = Image::new("a", vec!["33".to_string()], "").unwrap();

    let mut history = History::default();
    history.add(mid.clone());
    history.add(new.clone());
    history.add(old.clone());

    let ids: Vec<&str> = history.iter().map(|image| image.id.as_str()).collect();
    assert_eq!(ids, vec![new.id.as_str(), mid.id.as_str(), old.id.as_str()]);
    for pair in history.iter().collect::<Vec<_>>().windows(2) {
        assert!(pair[0].created >= pair[1].created);
    }
}

#[test]
fn history_del_removes_the_first_match() {
    let mut history = History::default();
    let image = Image::new("a", vec!["11".to_string()], "").unwrap();
    history.add(image.clone());
    assert_eq!(history.len(), 1);
    history.del("a:unknown");
    assert_eq!(history.len(), 1);
    history.del(&image.id);
    assert!(history.is_empty());
    assert!(history.latest().is_none());
}
