use anyhow::Result;
use facegate_vision::{face, ModelPaths, Pipeline};
use image::DynamicImage;
use std::path::Path;

fn model_paths() -> Option<ModelPaths> {
    let dir = std::env::var("FACEGATE_MODEL_DIR").unwrap_or_else(|_| "models".to_string());
    let paths = ModelPaths::in_dir(Path::new(&dir));
    if paths.detector.exists() && paths.recognizer.exists() {
        Some(paths)
    } else {
        eprintln!("Skipping: models not found in {}", dir);
        None
    }
}

fn best_embedding(pipeline: &mut Pipeline, img: &DynamicImage) -> Result<Vec<f32>> {
    pipeline
        .detect_and_embed(img)?
        .into_iter()
        .next()
        .map(|(_, embedding)| embedding)
        .ok_or_else(|| anyhow::anyhow!("no face detected in sample"))
}

#[test]
fn missing_models_fail_to_load() {
    let paths = ModelPaths::in_dir(Path::new("/nonexistent/facegate/models"));
    let err = match Pipeline::new(&paths) {
        Ok(_) => panic!("pipeline loaded without models"),
        Err(e) => e,
    };
    assert!(err.to_string().contains("model not found"));
}

#[test]
fn blank_frame_has_no_faces() -> Result<()> {
    env_logger::try_init().ok();
    let Some(paths) = model_paths() else {
        return Ok(());
    };
    let mut pipeline = Pipeline::new(&paths)?;

    let blank = DynamicImage::new_rgb8(640, 480);
    let faces = pipeline.detect_and_embed(&blank)?;
    assert!(faces.is_empty());
    Ok(())
}

#[test]
fn same_image_embeds_identically() -> Result<()> {
    env_logger::try_init().ok();
    let Some(paths) = model_paths() else {
        return Ok(());
    };
    let img_path = "test_faces/sample.png";
    if !Path::new(img_path).exists() {
        eprintln!("Skipping: {} not found", img_path);
        return Ok(());
    }

    let mut pipeline = Pipeline::new(&paths)?;
    let img = image::open(img_path)?;
    let first = best_embedding(&mut pipeline, &img)?;
    let second = best_embedding(&mut pipeline, &img)?;

    assert_eq!(first.len(), face::EMBEDDING_DIM);
    let dot: f32 = first.iter().zip(&second).map(|(a, b)| a * b).sum();
    println!("self similarity: {:.4}", dot);
    assert!(dot > 0.99);
    Ok(())
}
