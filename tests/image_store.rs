use boxd::errors::ImageError;
use boxd::image::Store;
use flate2::{write::GzEncoder, Compression};
use std::io::Write;
use tempfile::TempDir;
use tokio::runtime::Runtime;

fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, path, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

fn store(dir: &TempDir) -> Store {
    Store::new(dir.path().join("images")).unwrap()
}

#[test]
fn import_creates_a_final_image() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    Runtime::new().unwrap().block_on(async {
        let store = store(&dir);
        let archive = tar_bytes(&[("hello.txt", b"hello")]);
        let image = store.import("base", &archive[..], None).await.unwrap();

        assert!(image.id.starts_with("base:"));
        assert!(image.is_final());
        assert_eq!(image.parent, "");
        assert_eq!(image.layers.len(), 1);

        // the layer really landed on disk
        let layer_dir = store.layers().path(&image.layers[0]);
        let content = std::fs::read(layer_dir.join("hello.txt")).unwrap();
        assert_eq!(content, b"hello");

        // find works through both the name and the id
        assert_eq!(store.find("base").await.unwrap().id, image.id);
        assert_eq!(store.find(&image.id).await.unwrap().id, image.id);
        assert!(store.find("missing").await.is_none());
    });
}

#[test]
fn gzip_imports_are_accepted() {
    let dir = TempDir::new().unwrap();
    Runtime::new().unwrap().block_on(async {
        let store = store(&dir);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes(&[("z.txt", b"zz")])).unwrap();
        let archive = encoder.finish().unwrap();

        let image = store.import("zipped", &archive[..], None).await.unwrap();
        let layer_dir = store.layers().path(&image.layers[0]);
        assert_eq!(std::fs::read(layer_dir.join("z.txt")).unwrap(), b"zz");
    });
}

#[test]
fn import_chains_onto_the_parent() {
    let dir = TempDir::new().unwrap();
    Runtime::new().unwrap().block_on(async {
        let store = store(&dir);
        let base = store
            .import("base", &tar_bytes(&[("a", b"a")])[..], None)
            .await
            .unwrap();
        let child = store
            .import("snap", &tar_bytes(&[("b", b"b")])[..], Some(&base))
            .await
            .unwrap();

        assert_eq!(child.parent, base.id);
        assert_eq!(child.layers.len(), 2);
        assert_eq!(child.layers[1..], base.layers[..]);
        assert!(!child.is_final());
        assert!(child.display_id().ends_with("..."));
    });
}

#[test]
fn copy_shares_layers_and_records_the_source() {
    let dir = TempDir::new().unwrap();
    Runtime::new().unwrap().block_on(async {
        let store = store(&dir);
        let base = store
            .import("base", &tar_bytes(&[("a", b"a")])[..], None)
            .await
            .unwrap();
        let copied = store.copy("base", "clone").await.unwrap();

        assert_eq!(copied.layers, base.layers);
        assert_eq!(copied.parent, base.id);
        assert!(copied.id.starts_with("clone:"));
        assert_eq!(store.find("clone").await.unwrap().id, copied.id);

        assert!(matches!(
            store.copy("missing", "x").await,
            Err(ImageError::NoSuchImage(_))
        ));
        assert!(matches!(
            store.copy("base", "").await,
            Err(ImageError::IllegalName(_))
        ));
    });
}

#[test]
fn rename_rewrites_every_id() {
    let dir = TempDir::new().unwrap();
    Runtime::new().unwrap().block_on(async {
        let store = store(&dir);
        let old = store
            .import("before", &tar_bytes(&[("a", b"a")])[..], None)
            .await
            .unwrap();
        store.rename("before", "after").await.unwrap();

        assert!(store.find("before").await.is_none());
        assert!(store.find(&old.id).await.is_none());
        let renamed = store.find("after").await.unwrap();
        assert_eq!(renamed.layers, old.layers);
        assert!(renamed.id.starts_with("after:"));
        assert_eq!(store.find(&renamed.id).await.unwrap().id, renamed.id);

        // the new name must be free
        store
            .import("other", &tar_bytes(&[("b", b"b")])[..], None)
            .await
            .unwrap();
        assert!(matches!(
            store.rename("after", "other").await,
            Err(ImageError::NameInUse(_))
        ));
        assert!(matches!(
            store.rename("missing", "x").await,
            Err(ImageError::NoSuchImage(_))
        ));
    });
}

#[test]
fn delete_and_delete_match() {
    let dir = TempDir::new().unwrap();
    Runtime::new().unwrap().block_on(async {
        let store = store(&dir);
        store
            .import("keep", &tar_bytes(&[("a", b"a")])[..], None)
            .await
            .unwrap();
        store
            .import("snap-one", &tar_bytes(&[("b", b"b")])[..], None)
            .await
            .unwrap();
        store
            .import("snap-two", &tar_bytes(&[("c", b"c")])[..], None)
            .await
            .unwrap();

        assert!(matches!(
            store.delete("missing").await,
            Err(ImageError::NoSuchImage(_))
        ));
        assert!(matches!(
            store.delete_match("[invalid").await,
            Err(ImageError::BadPattern(_))
        ));

        store.delete_match("^snap-.*").await.unwrap();
        assert_eq!(store.names().await, vec!["keep".to_string()]);

        store.delete("keep").await.unwrap();
        assert!(store.names().await.is_empty());
        assert_eq!(store.image_count().await, 0);
    });
}

#[test]
fn duplicate_top_add_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    Runtime::new().unwrap().block_on(async {
        let store = store(&dir);
        let archive = tar_bytes(&[("a", b"a")]);
        let first = store.import("base", &archive[..], None).await.unwrap();
        let second = store.import("base", &archive[..], None).await.unwrap();
        assert_eq!(first.id, second.id);

        let all = store.all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].1.len(), 1);
    });
}

#[test]
fn index_survives_a_reopen() {
    let dir = TempDir::new().unwrap();
    Runtime::new().unwrap().block_on(async {
        let base_id;
        let snap_id;
        {
            let store = store(&dir);
            let base = store
                .import("base", &tar_bytes(&[("a", b"a")])[..], None)
                .await
                .unwrap();
            let snap = store
                .import("snap", &tar_bytes(&[("b", b"b")])[..], Some(&base))
                .await
                .unwrap();
            base_id = base.id;
            snap_id = snap.id;
        }

        let reopened = store(&dir);
        assert_eq!(reopened.find("base").await.unwrap().id, base_id);
        assert_eq!(reopened.find(&snap_id).await.unwrap().parent, base_id);
        assert_eq!(
            reopened.names().await,
            vec!["base".to_string(), "snap".to_string()]
        );

        // everything reachable by name is reachable by id with the same value
        for (_, history) in reopened.all().await {
            for image in &history {
                assert_eq!(reopened.find(&image.id).await.unwrap(), *image);
            }
        }
    });
}

#[test]
fn layer_store_delete() {
    let dir = TempDir::new().unwrap();
    Runtime::new().unwrap().block_on(async {
        let store = store(&dir);
        let image = store
            .import("base", &tar_bytes(&[("a", b"a")])[..], None)
            .await
            .unwrap();
        let digest = image.layers[0].clone();
        assert_eq!(store.layers().list().unwrap(), vec![digest.clone()]);
        assert!(store.layers().exists(&digest));

        store.layers().delete(&digest).unwrap();
        assert!(!store.layers().exists(&digest));
        assert!(matches!(
            store.layers().delete(&digest),
            Err(ImageError::NoSuchLayer(_))
        ));
    });
}
