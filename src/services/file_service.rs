//! File operations on a user's home prefix.
//!
//! Each operation validates its input, runs against the object store and then
//! hands the touched paths to [`SideEffects`]. Validation failures never reach
//! the store, and store failures skip the side effects.

use crate::{
    file_types::{DEFAULT_INDEX_HTML, ExtensionSet, content_type_for},
    models::{file_node::FileNode, upload::UploadFile, user::UserRef},
    services::{
        object_store::{ObjectStore, StoreError, delete_keys, list_all},
        path_validator::{
            ValidationError, assert_extension, basename, validate_directory, validate_filename,
            validate_path,
        },
        side_effects::SideEffects,
        tree_builder,
    },
};
use bytes::Bytes;
use std::{fmt, sync::Arc};
use thiserror::Error;
use tracing::{info, warn};

/// Upload ceiling per file.
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// The site's entry page. It can be edited but never deleted, renamed, moved
/// or replaced by a rename.
pub const HOME_PAGE: &str = "index.html";

const DIRECTORY_MARKER: &str = "index.html";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomePageAction {
    Delete,
    Rename,
    Move,
    Replace,
}

impl fmt::Display for HomePageAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HomePageAction::Delete => "deleted",
            HomePageAction::Rename => "renamed",
            HomePageAction::Move => "moved",
            HomePageAction::Replace => "replaced",
        })
    }
}

/// Which half of a copy-then-delete rename failed.
///
/// After `DeleteOriginal` both the old and the new key exist; retrying only
/// the delete completes the rename.
#[derive(Debug, Error)]
pub enum RenameError {
    #[error("copying to the new location failed")]
    Copy(#[source] StoreError),
    #[error("copied to `{destination}` but removing the original failed")]
    DeleteOriginal {
        destination: String,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Error)]
pub enum FileOpError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("no files were selected")]
    NoFiles,
    #[error("a file with that name already exists")]
    AlreadyExists,
    #[error("\"{name}\" already exists in the destination folder")]
    DestinationExists { name: String },
    #[error("the home page cannot be {0}")]
    HomePageProtected(HomePageAction),
    #[error("\"{name}\" is empty and cannot be uploaded")]
    EmptyFile { name: String },
    #[error("\"{name}\" is {size} bytes, only files up to 10 MiB can be uploaded")]
    TooLarge { name: String, size: u64 },
    #[error("file not found")]
    NotFound,
    #[error("object store operation failed")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Rename(#[from] RenameError),
    #[error("{source} ({} file(s) were uploaded before the failure)", .uploaded.len())]
    PartialUpload {
        uploaded: Vec<String>,
        #[source]
        source: Box<FileOpError>,
    },
}

pub type FileOpResult<T> = Result<T, FileOpError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryOutcome {
    Created,
    AlreadyExisted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Source already sits in the target directory.
    Unchanged,
    Moved { new_path: String },
}

#[derive(Clone)]
pub struct FileService {
    store: Arc<dyn ObjectStore>,
    side_effects: SideEffects,
}

impl FileService {
    pub fn new(store: Arc<dyn ObjectStore>, side_effects: SideEffects) -> Self {
        Self {
            store,
            side_effects,
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub async fn tree(&self, user: &UserRef) -> FileOpResult<Vec<FileNode>> {
        Ok(tree_builder::build_tree(self.store.as_ref(), &user.login_name).await?)
    }

    /// Contents of an editable file.
    pub async fn read_file(&self, user: &UserRef, path: &str) -> FileOpResult<Bytes> {
        validate_path(path)?;
        assert_extension(basename(path), ExtensionSet::Editable)?;

        let key = object_key(&user.login_name, path);
        self.store.get(&key).await?.ok_or(FileOpError::NotFound)
    }

    /// Create or overwrite an editable file.
    pub async fn save_file(&self, user: &UserRef, path: &str, contents: Bytes) -> FileOpResult<()> {
        validate_path(path)?;
        let name = basename(path);
        assert_extension(name, ExtensionSet::Editable)?;

        let key = object_key(&user.login_name, path);
        self.store.put(&key, contents, content_type_for(name)).await?;
        info!(login = %user.login_name, key = %key, "saved file");

        self.side_effects
            .after_mutation(user, &[path.to_string()])
            .await;
        Ok(())
    }

    /// Make a directory visible by writing a placeholder `index.html` in it.
    /// An existing placeholder is left as is.
    pub async fn create_directory(
        &self,
        user: &UserRef,
        path: &str,
    ) -> FileOpResult<DirectoryOutcome> {
        validate_path(path)?;

        let marker = join_relative(path, DIRECTORY_MARKER);
        let key = object_key(&user.login_name, &marker);
        if self.store.head(&key).await? {
            return Ok(DirectoryOutcome::AlreadyExisted);
        }

        self.store
            .put(
                &key,
                Bytes::from_static(DEFAULT_INDEX_HTML.as_bytes()),
                content_type_for(DIRECTORY_MARKER),
            )
            .await?;
        info!(login = %user.login_name, key = %key, "created directory");

        self.side_effects.after_mutation(user, &[marker]).await;
        Ok(DirectoryOutcome::Created)
    }

    /// Create an empty editable file. Fails if the name is taken.
    pub async fn create_file(
        &self,
        user: &UserRef,
        directory: &str,
        name: &str,
    ) -> FileOpResult<String> {
        validate_directory(directory)?;
        validate_filename(name)?;
        assert_extension(name, ExtensionSet::Editable)?;

        let path = join_relative(directory, name);
        let key = object_key(&user.login_name, &path);
        if self.store.head(&key).await? {
            return Err(FileOpError::AlreadyExists);
        }

        self.store
            .put(&key, Bytes::new(), content_type_for(name))
            .await?;
        info!(login = %user.login_name, key = %key, "created file");

        self.side_effects
            .after_mutation(user, std::slice::from_ref(&path))
            .await;
        Ok(path)
    }

    /// Delete a file, or a directory with everything beneath it.
    ///
    /// Returns the number of objects removed. A path with nothing stored
    /// under it is not an error.
    pub async fn delete(&self, user: &UserRef, path: &str) -> FileOpResult<usize> {
        ensure_not_home_page(path, HomePageAction::Delete)?;
        validate_path(path)?;

        let key = object_key(&user.login_name, path);
        let nested = format!("{}/", key);
        let doomed: Vec<String> = list_all(self.store.as_ref(), &key)
            .await?
            .into_iter()
            .map(|object| object.key)
            .filter(|k| *k == key || k.starts_with(&nested))
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }

        let deleted = delete_keys(self.store.as_ref(), &doomed).await?;
        info!(login = %user.login_name, key = %key, deleted, "deleted objects");

        let home = format!("{}/", user.login_name);
        let paths: Vec<String> = doomed
            .iter()
            .filter_map(|k| k.strip_prefix(&home))
            .map(str::to_string)
            .collect();
        self.side_effects.after_mutation(user, &paths).await;
        Ok(deleted)
    }

    /// Give a file a new name in the same directory. Returns the new path.
    ///
    /// An object already stored under the new name is overwritten, except for
    /// the home page.
    pub async fn rename(&self, user: &UserRef, path: &str, new_name: &str) -> FileOpResult<String> {
        ensure_not_home_page(path, HomePageAction::Rename)?;
        validate_path(path)?;
        validate_filename(new_name)?;

        let new_path = join_relative(parent_of(path), new_name);
        validate_path(&new_path)?;
        ensure_not_home_page(&new_path, HomePageAction::Replace)?;
        if new_path == path {
            return Ok(new_path);
        }

        self.relocate(user, path, &new_path).await?;
        Ok(new_path)
    }

    /// Move a file into `target_directory`, keeping its name.
    pub async fn move_file(
        &self,
        user: &UserRef,
        path: &str,
        target_directory: &str,
    ) -> FileOpResult<MoveOutcome> {
        ensure_not_home_page(path, HomePageAction::Move)?;
        validate_path(path)?;
        validate_directory(target_directory)?;

        let name = basename(path);
        let new_path = join_relative(target_directory, name);
        if new_path == path {
            return Ok(MoveOutcome::Unchanged);
        }

        let destination = object_key(&user.login_name, &new_path);
        if self.store.head(&destination).await? {
            return Err(FileOpError::DestinationExists {
                name: name.to_string(),
            });
        }

        self.relocate(user, path, &new_path).await?;
        Ok(MoveOutcome::Moved { new_path })
    }

    /// Copy `from` to `to`, then delete `from`. Not atomic.
    async fn relocate(&self, user: &UserRef, from: &str, to: &str) -> FileOpResult<()> {
        let source = object_key(&user.login_name, from);
        let destination = object_key(&user.login_name, to);

        match self.store.copy(&source, &destination).await {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => return Err(FileOpError::NotFound),
            Err(err) => return Err(RenameError::Copy(err).into()),
        }

        if let Err(source_err) = self.store.delete_batch(std::slice::from_ref(&source)).await {
            warn!(
                login = %user.login_name,
                source = %source,
                destination = %destination,
                error = %source_err,
                "copied but could not remove the original"
            );
            return Err(RenameError::DeleteOriginal {
                destination: to.to_string(),
                source: source_err,
            }
            .into());
        }
        info!(login = %user.login_name, from = %source, to = %destination, "relocated file");

        self.side_effects
            .after_mutation(user, &[from.to_string(), to.to_string()])
            .await;
        Ok(())
    }

    /// Store each file under `directory`, one at a time.
    ///
    /// Stops at the first failing file. Files stored before it stay in place
    /// and are listed in [`FileOpError::PartialUpload`].
    pub async fn upload_files(
        &self,
        user: &UserRef,
        directory: &str,
        files: Vec<UploadFile>,
    ) -> FileOpResult<Vec<String>> {
        if files.is_empty() {
            return Err(FileOpError::NoFiles);
        }

        let mut uploaded = Vec::with_capacity(files.len());
        for file in files {
            match self.upload_one(user, directory, file).await {
                Ok(path) => uploaded.push(path),
                Err(err) if uploaded.is_empty() => return Err(err),
                Err(err) => {
                    self.side_effects.after_mutation(user, &uploaded).await;
                    return Err(FileOpError::PartialUpload {
                        uploaded,
                        source: Box::new(err),
                    });
                }
            }
        }

        self.side_effects.after_mutation(user, &uploaded).await;
        Ok(uploaded)
    }

    async fn upload_one(
        &self,
        user: &UserRef,
        directory: &str,
        file: UploadFile,
    ) -> FileOpResult<String> {
        check_upload_size(&file)?;
        validate_directory(directory)?;
        validate_filename(&file.name)?;
        assert_extension(&file.name, ExtensionSet::Uploadable)?;

        let path = join_relative(directory, &file.name);
        let key = object_key(&user.login_name, &path);
        self.store
            .put(&key, file.body, content_type_for(&file.name))
            .await?;
        info!(login = %user.login_name, key = %key, "uploaded file");
        Ok(path)
    }
}

fn check_upload_size(file: &UploadFile) -> FileOpResult<()> {
    match file.size() {
        0 => Err(FileOpError::EmptyFile {
            name: file.name.clone(),
        }),
        size if size > MAX_UPLOAD_BYTES => Err(FileOpError::TooLarge {
            name: file.name.clone(),
            size,
        }),
        _ => Ok(()),
    }
}

/// Runs before validation so the home page is refused no matter how the
/// rest of the request looks.
fn ensure_not_home_page(path: &str, action: HomePageAction) -> FileOpResult<()> {
    if path.trim_start_matches('/') == HOME_PAGE {
        return Err(FileOpError::HomePageProtected(action));
    }
    Ok(())
}

/// `{home}/{relative}` with empty segments dropped.
pub fn object_key(home: &str, relative: &str) -> String {
    let mut key = String::from(home);
    for segment in relative.split('/').filter(|s| !s.is_empty()) {
        key.push('/');
        key.push_str(segment);
    }
    key
}

fn join_relative(directory: &str, name: &str) -> String {
    let directory = directory.trim_matches('/');
    if directory.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", directory, name)
    }
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        object_store::{MemoryStore, memory::StoreOperation},
        side_effects::tests::{RecordingActivity, RecordingPurger},
    };

    struct Fixture {
        store: Arc<MemoryStore>,
        purger: Arc<RecordingPurger>,
        activity: Arc<RecordingActivity>,
        service: FileService,
        user: UserRef,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_store(MemoryStore::new())
        }

        fn with_store(store: MemoryStore) -> Self {
            let store = Arc::new(store);
            let purger = Arc::new(RecordingPurger::default());
            let activity = Arc::new(RecordingActivity::default());
            let service = FileService::new(
                store.clone(),
                SideEffects::new(purger.clone(), activity.clone()),
            );
            Self {
                store,
                purger,
                activity,
                service,
                user: UserRef {
                    id: 1,
                    login_name: "alice".into(),
                },
            }
        }

        async fn seed(&self, keys: &[&str]) {
            for key in keys {
                self.store
                    .put(key, Bytes::from_static(b"seed"), "text/plain")
                    .await
                    .unwrap();
            }
        }

        fn purged(&self) -> Vec<String> {
            self.purger.purged.lock().unwrap().clone()
        }

        fn edits(&self) -> usize {
            self.activity.edits.lock().unwrap().len()
        }
    }

    #[tokio::test]
    async fn save_writes_with_content_type_and_runs_side_effects() {
        let fx = Fixture::new();
        fx.service
            .save_file(&fx.user, "blog/post.html", Bytes::from("<p>hi</p>"))
            .await
            .unwrap();

        assert_eq!(
            fx.store.get("alice/blog/post.html").await.unwrap(),
            Some(Bytes::from("<p>hi</p>"))
        );
        assert_eq!(
            fx.store.content_type("alice/blog/post.html").as_deref(),
            Some("text/html")
        );
        assert_eq!(fx.purged(), vec!["alice/blog/post.html"]);
        assert_eq!(fx.edits(), 1);
    }

    #[tokio::test]
    async fn save_rejects_traversal_before_touching_the_store() {
        let fx = Fixture::new();
        fx.store.fail_on(StoreOperation::Put);
        let err = fx
            .service
            .save_file(&fx.user, "../bob/index.html", Bytes::from("x"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FileOpError::Validation(ValidationError::PathTraversal)
        ));
        assert!(fx.purged().is_empty());
    }

    #[tokio::test]
    async fn save_rejects_non_editable_extensions() {
        let fx = Fixture::new();
        let err = fx
            .service
            .save_file(&fx.user, "photo.png", Bytes::from("x"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FileOpError::Validation(ValidationError::UnsupportedExtension { .. })
        ));
    }

    #[tokio::test]
    async fn side_effect_failures_do_not_fail_the_save() {
        let store = Arc::new(MemoryStore::new());
        let purger = Arc::new(RecordingPurger {
            fail: true,
            ..Default::default()
        });
        let activity = Arc::new(RecordingActivity {
            fail: true,
            ..Default::default()
        });
        let service = FileService::new(store.clone(), SideEffects::new(purger, activity));
        let user = UserRef {
            id: 1,
            login_name: "alice".into(),
        };

        service
            .save_file(&user, "a.css", Bytes::from("body{}"))
            .await
            .unwrap();
        assert!(store.head("alice/a.css").await.unwrap());
    }

    #[tokio::test]
    async fn store_failure_skips_side_effects() {
        let fx = Fixture::new();
        fx.store.fail_on(StoreOperation::Put);
        let err = fx
            .service
            .save_file(&fx.user, "a.css", Bytes::from("body{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, FileOpError::Store(_)));
        assert!(fx.purged().is_empty());
        assert_eq!(fx.edits(), 0);
    }

    #[tokio::test]
    async fn create_directory_is_idempotent() {
        let fx = Fixture::new();
        let first = fx.service.create_directory(&fx.user, "blog").await.unwrap();
        assert_eq!(first, DirectoryOutcome::Created);
        let marker = fx.store.get("alice/blog/index.html").await.unwrap().unwrap();
        assert_eq!(marker, Bytes::from_static(DEFAULT_INDEX_HTML.as_bytes()));

        fx.store
            .put("alice/blog/index.html", Bytes::from("custom"), "text/html")
            .await
            .unwrap();
        let second = fx.service.create_directory(&fx.user, "blog").await.unwrap();
        assert_eq!(second, DirectoryOutcome::AlreadyExisted);
        assert_eq!(
            fx.store.get("alice/blog/index.html").await.unwrap(),
            Some(Bytes::from("custom"))
        );
        assert_eq!(fx.edits(), 1);
    }

    #[tokio::test]
    async fn create_file_refuses_existing_names() {
        let fx = Fixture::new();
        let path = fx
            .service
            .create_file(&fx.user, "notes/", "todo.md")
            .await
            .unwrap();
        assert_eq!(path, "notes/todo.md");
        assert_eq!(
            fx.store.get("alice/notes/todo.md").await.unwrap(),
            Some(Bytes::new())
        );

        let err = fx
            .service
            .create_file(&fx.user, "notes", "todo.md")
            .await
            .unwrap_err();
        assert!(matches!(err, FileOpError::AlreadyExists));
    }

    #[tokio::test]
    async fn create_file_in_home_root() {
        let fx = Fixture::new();
        let path = fx.service.create_file(&fx.user, "", "about.html").await.unwrap();
        assert_eq!(path, "about.html");
        assert!(fx.store.head("alice/about.html").await.unwrap());
    }

    #[tokio::test]
    async fn delete_of_missing_path_succeeds_with_zero() {
        let fx = Fixture::new();
        let deleted = fx.service.delete(&fx.user, "ghost.html").await.unwrap();
        assert_eq!(deleted, 0);
        assert!(fx.store.delete_batch_calls().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_a_directory_but_not_its_siblings() {
        let fx = Fixture::new();
        fx.seed(&[
            "alice/blog/index.html",
            "alice/blog/a/b.css",
            "alice/blog.html",
            "alice/blogroll/x.html",
            "alice/index.html",
        ])
        .await;

        let deleted = fx.service.delete(&fx.user, "blog").await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(
            fx.store.keys(),
            vec!["alice/blog.html", "alice/blogroll/x.html", "alice/index.html"]
        );
        let mut purged = fx.purged();
        purged.sort();
        assert_eq!(purged, vec!["alice/blog/a/b.css", "alice/blog/index.html"]);
    }

    #[tokio::test]
    async fn delete_chunks_large_directories() {
        let fx = Fixture::with_store(MemoryStore::with_page_size(4).with_max_delete_batch(3));
        let keys: Vec<String> = (0..7).map(|i| format!("alice/big/{i}.txt")).collect();
        for key in &keys {
            fx.store.put(key, Bytes::from("x"), "text/plain").await.unwrap();
        }

        let deleted = fx.service.delete(&fx.user, "big").await.unwrap();
        assert_eq!(deleted, 7);
        assert_eq!(fx.store.delete_batch_calls(), vec![3, 3, 1]);
        assert!(fx.store.keys().is_empty());
    }

    #[tokio::test]
    async fn home_page_cannot_be_deleted() {
        let fx = Fixture::new();
        fx.seed(&["alice/index.html"]).await;
        for path in ["index.html", "/index.html"] {
            let err = fx.service.delete(&fx.user, path).await.unwrap_err();
            assert!(matches!(
                err,
                FileOpError::HomePageProtected(HomePageAction::Delete)
            ));
        }
        assert!(fx.store.head("alice/index.html").await.unwrap());
    }

    #[tokio::test]
    async fn home_page_cannot_be_renamed_to_anything() {
        let fx = Fixture::new();
        fx.seed(&["alice/index.html"]).await;
        for new_name in ["home.html", "", "../x", "CON.txt"] {
            let err = fx
                .service
                .rename(&fx.user, "/index.html", new_name)
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                FileOpError::HomePageProtected(HomePageAction::Rename)
            ));
            assert_eq!(err.to_string(), "the home page cannot be renamed");
        }
        assert_eq!(fx.store.keys(), vec!["alice/index.html"]);
    }

    #[tokio::test]
    async fn rename_copies_then_deletes() {
        let fx = Fixture::new();
        fx.seed(&["alice/blog/old.html"]).await;
        let new_path = fx
            .service
            .rename(&fx.user, "blog/old.html", "new.html")
            .await
            .unwrap();
        assert_eq!(new_path, "blog/new.html");
        assert_eq!(fx.store.keys(), vec!["alice/blog/new.html"]);
        assert_eq!(
            fx.purged(),
            vec!["alice/blog/old.html", "alice/blog/new.html"]
        );
    }

    #[tokio::test]
    async fn rename_of_missing_file_is_not_found() {
        let fx = Fixture::new();
        let err = fx
            .service
            .rename(&fx.user, "nope.html", "yes.html")
            .await
            .unwrap_err();
        assert!(matches!(err, FileOpError::NotFound));
    }

    #[tokio::test]
    async fn rename_reports_which_step_failed() {
        let fx = Fixture::new();
        fx.seed(&["alice/a.html"]).await;

        fx.store.fail_on(StoreOperation::Copy);
        let err = fx.service.rename(&fx.user, "a.html", "b.html").await.unwrap_err();
        assert!(matches!(err, FileOpError::Rename(RenameError::Copy(_))));
        assert_eq!(fx.store.keys(), vec!["alice/a.html"]);
        fx.store.recover(StoreOperation::Copy);

        fx.store.fail_on(StoreOperation::Delete);
        let err = fx.service.rename(&fx.user, "a.html", "b.html").await.unwrap_err();
        match err {
            FileOpError::Rename(RenameError::DeleteOriginal { destination, .. }) => {
                assert_eq!(destination, "b.html");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(fx.store.keys(), vec!["alice/a.html", "alice/b.html"]);
        assert!(fx.purged().is_empty());
    }

    #[tokio::test]
    async fn rename_to_same_name_is_a_no_op() {
        let fx = Fixture::new();
        fx.seed(&["alice/a.html"]).await;
        fx.store.fail_on(StoreOperation::Copy);
        let path = fx.service.rename(&fx.user, "a.html", "a.html").await.unwrap();
        assert_eq!(path, "a.html");
    }

    #[tokio::test]
    async fn rename_stays_in_the_same_directory() {
        let fx = Fixture::new();
        fx.store
            .put("alice/a.html", Bytes::from("source"), "text/html")
            .await
            .unwrap();
        fx.store
            .put("alice/blog/a.html", Bytes::from("existing"), "text/html")
            .await
            .unwrap();

        let err = fx
            .service
            .rename(&fx.user, "a.html", "blog/a.html")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FileOpError::Validation(ValidationError::IllegalCharacter('/'))
        ));
        let err = fx
            .service
            .rename(&fx.user, "a.html", "../bob/a.html")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FileOpError::Validation(ValidationError::PathTraversal)
        ));

        assert_eq!(
            fx.store.get("alice/blog/a.html").await.unwrap(),
            Some(Bytes::from("existing"))
        );
        assert_eq!(fx.store.keys(), vec!["alice/a.html", "alice/blog/a.html"]);
        assert_eq!(fx.edits(), 0);
    }

    #[tokio::test]
    async fn rename_cannot_replace_the_home_page() {
        let fx = Fixture::new();
        fx.seed(&["alice/index.html", "alice/draft.html"]).await;
        let err = fx
            .service
            .rename(&fx.user, "draft.html", "index.html")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FileOpError::HomePageProtected(HomePageAction::Replace)
        ));
        assert_eq!(err.to_string(), "the home page cannot be replaced");
        assert_eq!(fx.store.keys(), vec!["alice/draft.html", "alice/index.html"]);

        let path = fx
            .service
            .rename(&fx.user, "draft.html", "index.htm")
            .await
            .unwrap();
        assert_eq!(path, "index.htm");
    }

    #[tokio::test]
    async fn create_file_rejects_names_that_leave_the_directory() {
        let fx = Fixture::new();
        for name in ["../bob/x.html", "%2e%2e/x.html"] {
            let err = fx.service.create_file(&fx.user, "", name).await.unwrap_err();
            assert!(
                matches!(err, FileOpError::Validation(ValidationError::PathTraversal)),
                "{name}: {err:?}"
            );
        }
        let err = fx
            .service
            .create_file(&fx.user, "", "blog/x.html")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FileOpError::Validation(ValidationError::IllegalCharacter('/'))
        ));
        assert!(fx.store.keys().is_empty());
    }

    #[tokio::test]
    async fn upload_rejects_names_that_leave_the_directory() {
        let fx = Fixture::new();
        let err = fx
            .service
            .upload_files(&fx.user, "", vec![file_of("../bob/evil.png", 1)])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FileOpError::Validation(ValidationError::PathTraversal)
        ));
        assert!(fx.store.keys().is_empty());
        assert_eq!(fx.edits(), 0);
    }

    #[tokio::test]
    async fn move_refuses_an_occupied_destination() {
        let fx = Fixture::new();
        fx.store
            .put("alice/a.html", Bytes::from("source"), "text/html")
            .await
            .unwrap();
        fx.store
            .put("alice/blog/a.html", Bytes::from("existing"), "text/html")
            .await
            .unwrap();

        let err = fx
            .service
            .move_file(&fx.user, "a.html", "blog")
            .await
            .unwrap_err();
        assert!(matches!(err, FileOpError::DestinationExists { ref name } if name == "a.html"));
        assert_eq!(
            fx.store.get("alice/a.html").await.unwrap(),
            Some(Bytes::from("source"))
        );
        assert_eq!(
            fx.store.get("alice/blog/a.html").await.unwrap(),
            Some(Bytes::from("existing"))
        );
        assert_eq!(fx.edits(), 0);
    }

    #[tokio::test]
    async fn move_into_a_directory_and_back_to_root() {
        let fx = Fixture::new();
        fx.seed(&["alice/a.css"]).await;

        let outcome = fx.service.move_file(&fx.user, "a.css", "styles").await.unwrap();
        assert_eq!(
            outcome,
            MoveOutcome::Moved {
                new_path: "styles/a.css".into()
            }
        );
        let outcome = fx.service.move_file(&fx.user, "styles/a.css", "").await.unwrap();
        assert_eq!(
            outcome,
            MoveOutcome::Moved {
                new_path: "a.css".into()
            }
        );
        assert_eq!(fx.store.keys(), vec!["alice/a.css"]);

        let outcome = fx.service.move_file(&fx.user, "a.css", "").await.unwrap();
        assert_eq!(outcome, MoveOutcome::Unchanged);

        let err = fx.service.move_file(&fx.user, "a.css", "/").await.unwrap_err();
        assert!(matches!(
            err,
            FileOpError::Validation(ValidationError::PathTraversal)
        ));
    }

    fn file_of(name: &str, size: usize) -> UploadFile {
        UploadFile::new(name, vec![b'x'; size])
    }

    #[tokio::test]
    async fn upload_size_boundaries() {
        let fx = Fixture::new();
        let limit = MAX_UPLOAD_BYTES as usize;

        let err = fx
            .service
            .upload_files(&fx.user, "", vec![file_of("empty.png", 0)])
            .await
            .unwrap_err();
        assert!(matches!(err, FileOpError::EmptyFile { .. }));

        let uploaded = fx
            .service
            .upload_files(&fx.user, "", vec![file_of("exact.png", limit)])
            .await
            .unwrap();
        assert_eq!(uploaded, vec!["exact.png"]);

        let err = fx
            .service
            .upload_files(&fx.user, "", vec![file_of("over.png", limit + 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, FileOpError::TooLarge { size, .. } if size == MAX_UPLOAD_BYTES + 1));

        let err = fx
            .service
            .upload_files(&fx.user, "", vec![file_of("huge.png", 11 * 1024 * 1024)])
            .await
            .unwrap_err();
        assert!(matches!(err, FileOpError::TooLarge { .. }));

        assert_eq!(fx.store.keys(), vec!["alice/exact.png"]);
    }

    #[tokio::test]
    async fn upload_checks_fire_independently() {
        let fx = Fixture::new();
        let cases = [
            (file_of("ok.exe", 10), "extension"),
            (file_of("ok.png", 0), "empty"),
            (file_of("ok.png", MAX_UPLOAD_BYTES as usize + 1), "large"),
        ];
        for (file, expected) in cases {
            let err = fx
                .service
                .upload_files(&fx.user, "", vec![file])
                .await
                .unwrap_err();
            let actual = match err {
                FileOpError::Validation(ValidationError::UnsupportedExtension { .. }) => {
                    "extension"
                }
                FileOpError::EmptyFile { .. } => "empty",
                FileOpError::TooLarge { .. } => "large",
                other => panic!("unexpected error: {other:?}"),
            };
            assert_eq!(actual, expected);
        }
        assert!(fx.store.keys().is_empty());
    }

    #[tokio::test]
    async fn upload_accepts_images_and_audio_with_content_types() {
        let fx = Fixture::new();
        let uploaded = fx
            .service
            .upload_files(
                &fx.user,
                "media/",
                vec![file_of("cat.jpg", 3), file_of("song.mp3", 3)],
            )
            .await
            .unwrap();
        assert_eq!(uploaded, vec!["media/cat.jpg", "media/song.mp3"]);
        assert_eq!(
            fx.store.content_type("alice/media/cat.jpg").as_deref(),
            Some("image/jpeg")
        );
        assert_eq!(fx.edits(), 1);
    }

    #[tokio::test]
    async fn upload_keeps_files_stored_before_a_failure() {
        let fx = Fixture::new();
        let err = fx
            .service
            .upload_files(
                &fx.user,
                "",
                vec![file_of("a.png", 1), file_of("b.png", 0), file_of("c.png", 1)],
            )
            .await
            .unwrap_err();

        match err {
            FileOpError::PartialUpload { uploaded, source } => {
                assert_eq!(uploaded, vec!["a.png"]);
                assert!(matches!(*source, FileOpError::EmptyFile { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(fx.store.keys(), vec!["alice/a.png"]);
        assert_eq!(fx.purged(), vec!["alice/a.png"]);
    }

    #[tokio::test]
    async fn upload_without_files() {
        let fx = Fixture::new();
        let err = fx
            .service
            .upload_files(&fx.user, "", Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FileOpError::NoFiles));
    }

    #[tokio::test]
    async fn read_file_distinguishes_missing() {
        let fx = Fixture::new();
        fx.seed(&["alice/a.txt"]).await;
        assert_eq!(
            fx.service.read_file(&fx.user, "a.txt").await.unwrap(),
            Bytes::from_static(b"seed")
        );
        let err = fx.service.read_file(&fx.user, "b.txt").await.unwrap_err();
        assert!(matches!(err, FileOpError::NotFound));
    }

    #[test]
    fn object_keys_drop_empty_segments() {
        assert_eq!(object_key("alice", "a//b/"), "alice/a/b");
        assert_eq!(object_key("alice", ""), "alice");
        assert_eq!(join_relative("/dir/", "x.html"), "dir/x.html");
        assert_eq!(parent_of("a/b/c.html"), "a/b");
        assert_eq!(parent_of("c.html"), "");
    }
}
