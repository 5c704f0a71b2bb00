use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use assert_fs::TempDir;
use image::{GrayImage, Luma};
use predicates::prelude::*;
use rand::prelude::*;
use rstest::*;

macro_rules! cargo_run {
    ($cmd:expr, $($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin($cmd)?;
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

/// 生成由 8x8 随机色块组成的图片，纹理足够丰富
fn write_blocks(path: &Path, seed: u64) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let blocks = (0..32 * 32).map(|_| rng.random::<u8>()).collect::<Vec<_>>();
    let image = GrayImage::from_fn(256, 256, |x, y| Luma([blocks[(y / 8 * 32 + x / 8) as usize]]));
    std::fs::create_dir_all(path.parent().unwrap())?;
    image.save(path)?;
    Ok(())
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn data(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    fn dataset(&self) -> PathBuf {
        self.dir.path().join("dataset")
    }

    fn image(&self, object: &str, image: &str) -> PathBuf {
        self.dataset().join(object).join(format!("{image}.png"))
    }
}

#[fixture]
fn workspace() -> Workspace {
    let ws = Workspace { dir: TempDir::new().unwrap() };
    write_blocks(&ws.image("cup", "front"), 1).unwrap();
    write_blocks(&ws.image("cup", "back"), 2).unwrap();
    write_blocks(&ws.image("book", "cover"), 3).unwrap();
    ws
}

#[rstest]
fn add_train_search(workspace: Workspace) -> Result<()> {
    let data = workspace.data();

    cargo_run!("iqindex", "-d", &data, "add", workspace.dataset(), "--train")
        .success()
        .stdout(predicate::str::contains("3 added"));

    // book 排在 cup 之前
    cargo_run!("iqindex", "-d", &data, "search", workspace.image("cup", "back"))
        .success()
        .stdout(predicate::str::contains("cup").and(predicate::str::contains("match: 1")));
    cargo_run!("iqindex", "-d", &data, "search", workspace.image("book", "cover"))
        .success()
        .stdout(predicate::str::contains("match: 0"));

    Ok(())
}

#[rstest]
fn search_json_output(workspace: Workspace) -> Result<()> {
    let data = workspace.data();
    cargo_run!("iqindex", "-d", &data, "add", workspace.dataset(), "--train").success();

    cargo_run!(
        "iqindex",
        "-d",
        &data,
        "search",
        workspace.image("cup", "front"),
        "--output-format",
        "json"
    )
    .success()
    .stdout(predicate::str::contains("\"matched\": 1").and(predicate::str::contains("\"object_id\": \"cup\"")));

    Ok(())
}

#[rstest]
fn unknown_image_does_not_match(workspace: Workspace) -> Result<()> {
    let data = workspace.data();
    cargo_run!("iqindex", "-d", &data, "add", workspace.dataset(), "--train").success();

    let unknown = workspace.dir.path().join("unknown.png");
    write_blocks(&unknown, 99)?;
    cargo_run!("iqindex", "-d", &data, "search", &unknown, "--distance", "40")
        .success()
        .stdout(predicate::str::contains("match: none"));

    Ok(())
}

#[rstest]
fn search_requires_train(workspace: Workspace) -> Result<()> {
    let data = workspace.data();
    cargo_run!("iqindex", "-d", &data, "add", workspace.dataset()).success();

    cargo_run!("iqindex", "-d", &data, "search", workspace.image("cup", "front"))
        .failure()
        .stderr(predicate::str::contains("train"));

    cargo_run!("iqindex", "-d", &data, "train").success();
    cargo_run!("iqindex", "-d", &data, "search", workspace.image("cup", "front")).success();

    Ok(())
}

#[rstest]
fn add_skips_existing_images(workspace: Workspace) -> Result<()> {
    let data = workspace.data();
    cargo_run!("iqindex", "-d", &data, "add", workspace.dataset()).success();
    cargo_run!("iqindex", "-d", &data, "add", workspace.dataset())
        .success()
        .stdout(predicate::str::contains("0 added, 3 skipped"));

    Ok(())
}

#[rstest]
fn list_and_describe(workspace: Workspace) -> Result<()> {
    let data = workspace.data();
    cargo_run!("iqindex", "-d", &data, "add", workspace.dataset()).success();
    cargo_run!("iqindex", "-d", &data, "describe", "cup", "马克杯", "-m", "白色").success();
    cargo_run!("iqindex", "-d", &data, "describe", "nothing", "x").failure();

    cargo_run!("iqindex", "-d", &data, "list")
        .success()
        .stdout(predicate::str::contains("0\tbook\tbook\t1").and(predicate::str::contains("1\tcup\t马克杯\t2")));
    cargo_run!("iqindex", "-d", &data, "list", "--output-format", "json")
        .success()
        .stdout(predicate::str::contains("\"meta\": \"白色\""));

    Ok(())
}

#[rstest]
fn init_from_seed(workspace: Workspace) -> Result<()> {
    let seed = workspace.data();
    cargo_run!("iqindex", "-d", &seed, "add", workspace.dataset()).success();

    let target = workspace.dir.path().join("target");
    cargo_run!("iqindex", "-d", &target, "init", &seed)
        .success()
        .stdout(predicate::str::contains("2 个物体，3 张图片"));
    cargo_run!("iqindex", "-d", &target, "search", workspace.image("book", "cover"))
        .success()
        .stdout(predicate::str::contains("match: 0"));

    Ok(())
}

#[rstest]
fn show_writes_keypoints(workspace: Workspace) -> Result<()> {
    let output = workspace.dir.path().join("keypoints.png");
    cargo_run!(
        "iqindex",
        "-d",
        workspace.data(),
        "show",
        workspace.image("cup", "front"),
        "-o",
        &output
    )
    .success()
    .stdout(predicate::str::contains("keypoints"));
    assert!(output.exists());

    Ok(())
}
