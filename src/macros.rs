#![allow(unused_macros)]

/// Helper macro for locking items
///
/// ```rust, ignore
///  let mut inner = lock!(task.state);
///  inner.status = TaskStatus::Running;
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock.lock().expect("Failed to acquire lock")
    };
}

/// Helper macro for reading locked items
///
/// ```rust, ignore
///  let fields = read_lock!(object.fields);
///  println!("{:?}", fields.get(&key));
/// ```
macro_rules! read_lock {
    ($arc_rwlock:expr) => {
        $arc_rwlock.read().expect("Failed to acquire read lock")
    };
}

/// Helper macro for writing to locked items
///
/// ```rust, ignore
///  let mut fields = write_lock!(object.fields);
///  fields.insert(key, ManagedValue::I4(42));
/// ```
macro_rules! write_lock {
    ($arc_rwlock:expr) => {
        $arc_rwlock.write().expect("Failed to acquire write lock")
    };
}

/// Helper macro for reading locked items through a closure
///
/// ```rust, ignore
///  let len = with_read!(builder.text, |text: &String| text.len());
/// ```
macro_rules! with_read {
    ($arc_rwlock:expr, $closure:expr) => {{
        let guard = $arc_rwlock.read().expect("Failed to acquire read lock");
        $closure(&*guard)
    }};
}

/// Helper macro for writing to locked items through a closure
///
/// ```rust, ignore
///  with_write!(builder.text, |text: &mut String| text.push_str("x"));
/// ```
macro_rules! with_write {
    ($arc_rwlock:expr, $closure:expr) => {{
        let mut guard = $arc_rwlock.write().expect("Failed to acquire write lock");
        $closure(&mut *guard)
    }};
}
