//! Process-wide storage for objects that outlive the task that made them.
//!
//! A task that migrates between hosts can leave state behind under a known
//! id and pick it up again when it comes back.

use std::any::Any;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use uuid::Uuid;

type Object = Arc<dyn Any + Send + Sync>;

fn objects() -> &'static DashMap<Uuid, Object> {
    static OBJECTS: OnceLock<DashMap<Uuid, Object>> = OnceLock::new();
    OBJECTS.get_or_init(DashMap::new)
}

pub struct ObjectSpace;

impl ObjectSpace {
    /// Stores `value` under `id`, replacing whatever was there
    pub fn put<T: Any + Send + Sync>(id: Uuid, value: T) -> Arc<T> {
        let value = Arc::new(value);
        let object: Object = value.clone();
        objects().insert(id, object);
        value
    }

    /// Returns the object under `id` if it exists and has type `T`
    pub fn get<T: Any + Send + Sync>(id: Uuid) -> Option<Arc<T>> {
        let object = objects().get(&id).map(|entry| Arc::clone(entry.value()))?;
        object.downcast::<T>().ok()
    }

    pub fn contains(id: Uuid) -> bool {
        objects().contains_key(&id)
    }

    pub fn remove(id: Uuid) -> bool {
        objects().remove(&id).is_some()
    }
}
