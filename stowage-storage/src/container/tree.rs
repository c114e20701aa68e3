//! Pure-Rust container backend.
//!
//! The whole hierarchy lives in memory while a file is open and is serialized
//! as a single JSON document when a created container is finalized. All
//! handles of one file share the tree through a lock; every handle registers
//! itself with the backend's counter for as long as it is alive.
//!
//! This is a stand-in for a real HDF5 backend: files it writes carry the
//! `.h5` names of the layout but are JSON documents, and HDF5 tools cannot
//! open them. Only this backend reads them back.

use std::{
    any::Any,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{
    AttributeValue, Attributes, Child, Completion, ContainerBackend, ContainerFile, DataSet,
    DataType, Group, OpenMode, Values,
};
use crate::{
    error::{StorageError, StorageResult},
    fs::{resolve, Retrieved},
};

const TREE_FORMAT: &str = "stowage-tree";
const TREE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Node {
    Group {
        #[serde(default)]
        attributes: IndexMap<String, AttributeValue>,
        #[serde(default)]
        children: IndexMap<String, Node>,
    },
    DataSet {
        #[serde(default)]
        attributes: IndexMap<String, AttributeValue>,
        shape: Vec<usize>,
        values: Values,
    },
}

impl Node {
    fn empty_group() -> Self {
        Node::Group {
            attributes: IndexMap::new(),
            children: IndexMap::new(),
        }
    }

    fn attributes(&self) -> &IndexMap<String, AttributeValue> {
        match self {
            Node::Group { attributes, .. } | Node::DataSet { attributes, .. } => attributes,
        }
    }

    fn attributes_mut(&mut self) -> &mut IndexMap<String, AttributeValue> {
        match self {
            Node::Group { attributes, .. } | Node::DataSet { attributes, .. } => attributes,
        }
    }
}

#[derive(Serialize)]
struct DocumentRef<'a> {
    format: &'a str,
    version: u32,
    root: &'a Node,
}

#[derive(Deserialize)]
struct Document {
    format: String,
    version: u32,
    root: Node,
}

#[derive(Debug)]
struct TreeState {
    root: Node,
    writable: bool,
}

type SharedTree = Arc<RwLock<TreeState>>;

#[derive(Debug, Default)]
struct HandleCounter(AtomicUsize);

#[derive(Debug)]
struct HandleGuard(Arc<HandleCounter>);

impl HandleGuard {
    fn acquire(counter: &Arc<HandleCounter>) -> Self {
        counter.0.fetch_add(1, Ordering::SeqCst);
        HandleGuard(counter.clone())
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.0 .0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn describe(location: &[String]) -> String {
    format!("/{}", location.join("/"))
}

fn resolve_node<'a>(root: &'a Node, location: &[String]) -> StorageResult<&'a Node> {
    let mut current = root;
    for (depth, name) in location.iter().enumerate() {
        current = match current {
            Node::Group { children, .. } => {
                children
                    .get(name)
                    .ok_or_else(|| StorageError::NoSuchChild {
                        parent: describe(&location[..depth]),
                        name: name.clone(),
                    })?
            }
            Node::DataSet { .. } => {
                return Err(StorageError::NotAGroup(describe(&location[..depth])))
            }
        };
    }
    Ok(current)
}

fn resolve_node_mut<'a>(root: &'a mut Node, location: &[String]) -> StorageResult<&'a mut Node> {
    let mut current = root;
    for (depth, name) in location.iter().enumerate() {
        current = match current {
            Node::Group { children, .. } => {
                children
                    .get_mut(name)
                    .ok_or_else(|| StorageError::NoSuchChild {
                        parent: describe(&location[..depth]),
                        name: name.clone(),
                    })?
            }
            Node::DataSet { .. } => {
                return Err(StorageError::NotAGroup(describe(&location[..depth])))
            }
        };
    }
    Ok(current)
}

/// State shared by group and dataset handles.
#[derive(Debug)]
struct TreeHandle {
    tree: SharedTree,
    counter: Arc<HandleCounter>,
    location: Vec<String>,
    _guard: HandleGuard,
}

impl TreeHandle {
    fn new(tree: SharedTree, counter: Arc<HandleCounter>, location: Vec<String>) -> Self {
        let _guard = HandleGuard::acquire(&counter);
        Self {
            tree,
            counter,
            location,
            _guard,
        }
    }

    fn child_location(&self, name: &str) -> Vec<String> {
        let mut location = self.location.clone();
        location.push(name.to_string());
        location
    }

    fn ensure_writable(&self, target: &str) -> StorageResult<()> {
        if self.tree.read().writable {
            Ok(())
        } else {
            Err(StorageError::ReadOnly(target.to_string()))
        }
    }

    fn attribute_names(&self) -> StorageResult<Vec<String>> {
        let state = self.tree.read();
        let node = resolve_node(&state.root, &self.location)?;
        Ok(node.attributes().keys().cloned().collect())
    }

    fn read_attribute(&self, name: &str) -> StorageResult<AttributeValue> {
        let state = self.tree.read();
        let node = resolve_node(&state.root, &self.location)?;
        node.attributes()
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NoSuchAttribute {
                object: describe(&self.location),
                name: name.to_string(),
            })
    }

    fn write_attribute(&self, name: &str, value: AttributeValue) -> StorageResult<()> {
        self.ensure_writable(&describe(&self.location))?;
        let mut state = self.tree.write();
        let node = resolve_node_mut(&mut state.root, &self.location)?;
        node.attributes_mut().insert(name.to_string(), value);
        Ok(())
    }
}

#[derive(Debug)]
struct TreeGroup(TreeHandle);

#[derive(Debug)]
struct TreeDataSet(TreeHandle);

macro_rules! impl_tree_attributes {
    ($($handle:ty),*) => {
        $(
            impl Attributes for $handle {
                fn location(&self) -> String {
                    describe(&self.0.location)
                }

                fn attribute_names(&self) -> StorageResult<Vec<String>> {
                    self.0.attribute_names()
                }

                fn read_attribute(&self, name: &str) -> StorageResult<AttributeValue> {
                    self.0.read_attribute(name)
                }

                fn write_attribute(&self, name: &str, value: AttributeValue) -> StorageResult<()> {
                    self.0.write_attribute(name, value)
                }
            }
        )*
    };
}

impl_tree_attributes!(TreeGroup, TreeDataSet);

impl Group for TreeGroup {
    fn children(&self) -> StorageResult<Vec<String>> {
        let state = self.0.tree.read();
        match resolve_node(&state.root, &self.0.location)? {
            Node::Group { children, .. } => Ok(children.keys().cloned().collect()),
            Node::DataSet { .. } => Err(StorageError::NotAGroup(describe(&self.0.location))),
        }
    }

    fn open(&self, name: &str) -> StorageResult<Child> {
        let location = self.0.child_location(name);
        let is_group = {
            let state = self.0.tree.read();
            matches!(resolve_node(&state.root, &location)?, Node::Group { .. })
        };

        let handle = TreeHandle::new(self.0.tree.clone(), self.0.counter.clone(), location);
        Ok(if is_group {
            Child::Group(Box::new(TreeGroup(handle)))
        } else {
            Child::DataSet(Box::new(TreeDataSet(handle)))
        })
    }

    fn create_group(&self, name: &str) -> StorageResult<Box<dyn Group>> {
        let location = self.0.child_location(name);
        self.0.ensure_writable(&describe(&location))?;
        {
            let mut state = self.0.tree.write();
            let Node::Group { children, .. } = resolve_node_mut(&mut state.root, &self.0.location)?
            else {
                return Err(StorageError::NotAGroup(describe(&self.0.location)));
            };

            match children.get(name) {
                Some(Node::Group { .. }) => {}
                Some(Node::DataSet { .. }) => {
                    return Err(StorageError::AlreadyExists(describe(&location)))
                }
                None => {
                    children.insert(name.to_string(), Node::empty_group());
                }
            }
        }

        Ok(Box::new(TreeGroup(TreeHandle::new(
            self.0.tree.clone(),
            self.0.counter.clone(),
            location,
        ))))
    }

    fn write_dataset(
        &self,
        name: &str,
        values: Values,
        shape: &[usize],
    ) -> StorageResult<Box<dyn DataSet>> {
        let location = self.0.child_location(name);
        self.0.ensure_writable(&describe(&location))?;

        let expected: usize = shape.iter().product();
        if expected != values.len() {
            return Err(StorageError::InvalidShape {
                location: describe(&location),
                shape: shape.to_vec(),
                len: values.len(),
            });
        }

        {
            let mut state = self.0.tree.write();
            let Node::Group { children, .. } = resolve_node_mut(&mut state.root, &self.0.location)?
            else {
                return Err(StorageError::NotAGroup(describe(&self.0.location)));
            };
            if children.contains_key(name) {
                return Err(StorageError::AlreadyExists(describe(&location)));
            }
            children.insert(
                name.to_string(),
                Node::DataSet {
                    attributes: IndexMap::new(),
                    shape: shape.to_vec(),
                    values,
                },
            );
        }

        Ok(Box::new(TreeDataSet(TreeHandle::new(
            self.0.tree.clone(),
            self.0.counter.clone(),
            location,
        ))))
    }
}

impl TreeDataSet {
    fn with_dataset<T>(
        &self,
        f: impl FnOnce(&[usize], &Values) -> T,
    ) -> StorageResult<T> {
        let state = self.0.tree.read();
        match resolve_node(&state.root, &self.0.location)? {
            Node::DataSet { shape, values, .. } => Ok(f(shape, values)),
            Node::Group { .. } => Err(StorageError::NotADataSet(describe(&self.0.location))),
        }
    }
}

impl DataSet for TreeDataSet {
    fn data_type(&self) -> StorageResult<DataType> {
        self.with_dataset(|_, values| values.data_type())
    }

    fn shape(&self) -> StorageResult<Vec<usize>> {
        self.with_dataset(|shape, _| shape.to_vec())
    }

    fn values(&self) -> StorageResult<Values> {
        self.with_dataset(|_, values| values.clone())
    }
}

/// An open tree container.
#[derive(Debug)]
pub struct TreeFile {
    tree: SharedTree,
    counter: Arc<HandleCounter>,
    destination: Option<String>,
    origin: Option<PathBuf>,
    _guard: HandleGuard,
}

impl TreeFile {
    fn new(
        root: Node,
        writable: bool,
        counter: Arc<HandleCounter>,
        destination: Option<String>,
        origin: Option<PathBuf>,
    ) -> Self {
        let _guard = HandleGuard::acquire(&counter);
        Self {
            tree: Arc::new(RwLock::new(TreeState { root, writable })),
            counter,
            destination,
            origin,
            _guard,
        }
    }

    fn to_bytes(&self) -> StorageResult<Bytes> {
        let state = self.tree.read();
        let document = DocumentRef {
            format: TREE_FORMAT,
            version: TREE_FORMAT_VERSION,
            root: &state.root,
        };
        Ok(Bytes::from(serde_json::to_vec(&document)?))
    }
}

impl ContainerFile for TreeFile {
    fn root(&self) -> StorageResult<Box<dyn Group>> {
        Ok(Box::new(TreeGroup(TreeHandle::new(
            self.tree.clone(),
            self.counter.clone(),
            Vec::new(),
        ))))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone)]
enum Persistence {
    Buffered,
    Direct(PathBuf),
}

/// [`ContainerBackend`] for the JSON tree container.
#[derive(Debug, Clone)]
pub struct TreeContainerBackend {
    persistence: Persistence,
    counter: Arc<HandleCounter>,
}

impl TreeContainerBackend {
    /// Finalized containers are handed back as bytes.
    pub fn buffered() -> Self {
        Self {
            persistence: Persistence::Buffered,
            counter: Arc::default(),
        }
    }

    /// Finalized containers are written below `root` by the backend itself.
    pub fn direct<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            persistence: Persistence::Direct(root.into()),
            counter: Arc::default(),
        }
    }

    /// Number of files, groups and datasets currently open through this backend.
    pub fn open_handles(&self) -> usize {
        self.counter.0.load(Ordering::SeqCst)
    }

    fn parse(bytes: &[u8]) -> StorageResult<Node> {
        let document: Document = serde_json::from_slice(bytes)
            .map_err(|e| StorageError::Corrupt(format!("unreadable tree container: {}", e)))?;
        if document.format != TREE_FORMAT {
            return Err(StorageError::Corrupt(format!(
                "unexpected container format '{}'",
                document.format
            )));
        }
        if document.version > TREE_FORMAT_VERSION {
            return Err(StorageError::Corrupt(format!(
                "unsupported tree container version {}",
                document.version
            )));
        }
        if !matches!(document.root, Node::Group { .. }) {
            return Err(StorageError::Corrupt(
                "container root is not a group".to_string(),
            ));
        }
        Ok(document.root)
    }
}

impl Default for TreeContainerBackend {
    fn default() -> Self {
        Self::buffered()
    }
}

#[async_trait::async_trait]
impl ContainerBackend for TreeContainerBackend {
    async fn open(
        &self,
        source: &Retrieved,
        mode: OpenMode,
    ) -> StorageResult<Box<dyn ContainerFile>> {
        let (root, origin) = match source {
            Retrieved::Bytes(bytes) => (Self::parse(bytes)?, None),
            Retrieved::Path(path) => {
                let contents = tokio::fs::read(path)
                    .await
                    .map_err(|e| StorageError::from_io(e, &path.display().to_string()))?;
                (Self::parse(&contents)?, Some(path.clone()))
            }
        };

        Ok(Box::new(TreeFile::new(
            root,
            mode == OpenMode::ReadWrite,
            self.counter.clone(),
            None,
            origin,
        )))
    }

    async fn create(&self, path: &str) -> StorageResult<Box<dyn ContainerFile>> {
        Ok(Box::new(TreeFile::new(
            Node::empty_group(),
            true,
            self.counter.clone(),
            Some(path.to_string()),
            None,
        )))
    }

    async fn finalize(
        &self,
        file: Box<dyn ContainerFile>,
        completion: Completion,
    ) -> StorageResult<Option<Bytes>> {
        let tree_file = file.as_any().downcast_ref::<TreeFile>().ok_or_else(|| {
            StorageError::Corrupt("container was not created by this backend".to_string())
        })?;

        if completion == Completion::Failed {
            tracing::debug!(
                "discarding partially written container {:?}",
                tree_file.destination
            );
            return Ok(None);
        }

        let bytes = tree_file.to_bytes()?;
        let target = match (&self.persistence, &tree_file.destination, &tree_file.origin) {
            (Persistence::Buffered, _, _) => None,
            (Persistence::Direct(root), Some(destination), _) => Some(resolve(root, destination)),
            (Persistence::Direct(_), None, Some(origin)) => Some(origin.clone()),
            (Persistence::Direct(_), None, None) => None,
        };
        drop(file);

        match target {
            Some(target) => {
                tokio::fs::write(&target, &bytes).await?;
                Ok(None)
            }
            None => Ok(Some(bytes)),
        }
    }
}
