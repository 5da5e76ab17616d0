use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::rc::{self, Rc};
use std::sync::{self, Arc, Mutex, RwLock, TryLockError};

use specimen_types::Node;

use crate::{Inspect, Inspector};

macro_rules! signed {
    ($($ty:ty),*) => {$(
        impl Inspect for $ty {
            fn inspect(&self, cx: Inspector<'_>) -> Node {
                cx.int(i64::from(*self))
            }
        }
    )*};
}

macro_rules! unsigned {
    ($($ty:ty),*) => {$(
        impl Inspect for $ty {
            fn inspect(&self, cx: Inspector<'_>) -> Node {
                cx.uint(u64::from(*self))
            }
        }
    )*};
}

signed!(i8, i16, i32, i64);
unsigned!(u8, u16, u32, u64);

impl Inspect for isize {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        cx.int(*self as i64)
    }
}

impl Inspect for usize {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        cx.uint(*self as u64)
    }
}

impl Inspect for i128 {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        match i64::try_from(*self) {
            Ok(value) => cx.int(value),
            Err(_) => cx.str(&self.to_string()),
        }
    }
}

impl Inspect for u128 {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        match u64::try_from(*self) {
            Ok(value) => cx.uint(value),
            Err(_) => cx.str(&self.to_string()),
        }
    }
}

impl Inspect for f32 {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        cx.float(f64::from(*self))
    }
}

impl Inspect for f64 {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        cx.float(*self)
    }
}

impl Inspect for bool {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        cx.bool(*self)
    }
}

impl Inspect for char {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        cx.str(self.encode_utf8(&mut [0; 4]))
    }
}

impl Inspect for () {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        cx.null()
    }
}

impl Inspect for str {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        cx.str(self)
    }
}

impl Inspect for String {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        cx.str(self)
    }
}

impl Inspect for Cow<'_, str> {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        cx.str(self)
    }
}

impl<T: Inspect + ?Sized> Inspect for &T {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        (**self).inspect(cx)
    }
}

impl<T: Inspect + ?Sized> Inspect for &mut T {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        (**self).inspect(cx)
    }
}

impl<T: Inspect + ?Sized> Inspect for Box<T> {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        (**self).inspect(cx)
    }
}

impl<T: Inspect> Inspect for Option<T> {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        match self {
            Some(value) => value.inspect(cx),
            None => cx.null(),
        }
    }
}

impl<T: Inspect, E: Inspect> Inspect for Result<T, E> {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        match self {
            Ok(value) => cx.record("Ok").field("0", value).finish(),
            Err(error) => cx.record("Err").field("0", error).finish(),
        }
    }
}

impl<T: Inspect> Inspect for [T] {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        cx.seq(None, self.iter())
    }
}

impl<T: Inspect, const N: usize> Inspect for [T; N] {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        cx.seq(None, self.iter())
    }
}

impl<T: Inspect> Inspect for Vec<T> {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        cx.seq(None, self.iter())
    }
}

impl<T: Inspect> Inspect for VecDeque<T> {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        cx.seq(Some("VecDeque"), self.iter())
    }
}

impl<T: Inspect, S> Inspect for HashSet<T, S> {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        cx.seq(Some("HashSet"), self.iter())
    }
}

impl<T: Inspect> Inspect for BTreeSet<T> {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        cx.seq(Some("BTreeSet"), self.iter())
    }
}

impl<K: Inspect, V: Inspect, S> Inspect for HashMap<K, V, S> {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        cx.map(None, self.iter())
    }
}

impl<K: Inspect, V: Inspect> Inspect for BTreeMap<K, V> {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        cx.map(None, self.iter())
    }
}

macro_rules! tuples {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: Inspect),+> Inspect for ($($name,)+) {
            fn inspect(&self, cx: Inspector<'_>) -> Node {
                let items: &[&dyn Inspect] = &[$(&self.$idx),+];
                cx.seq(Some("tuple"), items.iter())
            }
        }
    };
}

tuples!(A: 0);
tuples!(A: 0, B: 1);
tuples!(A: 0, B: 1, C: 2);
tuples!(A: 0, B: 1, C: 2, D: 3);
tuples!(A: 0, B: 1, C: 2, D: 3, E: 4);
tuples!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);

impl<T: Inspect + ?Sized> Inspect for Rc<T> {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        cx.shared(Rc::as_ptr(self) as *const (), "Rc", |cx| {
            (**self).inspect(cx)
        })
    }
}

impl<T: Inspect + ?Sized> Inspect for Arc<T> {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        cx.shared(Arc::as_ptr(self) as *const (), "Arc", |cx| {
            (**self).inspect(cx)
        })
    }
}

impl<T: Inspect + ?Sized> Inspect for rc::Weak<T> {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        match self.upgrade() {
            Some(strong) => strong.inspect(cx),
            None => cx.unavailable("Weak"),
        }
    }
}

impl<T: Inspect + ?Sized> Inspect for sync::Weak<T> {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        match self.upgrade() {
            Some(strong) => strong.inspect(cx),
            None => cx.unavailable("Weak"),
        }
    }
}

impl<T: Inspect + Copy> Inspect for Cell<T> {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        self.get().inspect(cx)
    }
}

impl<T: Inspect + ?Sized> Inspect for RefCell<T> {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        match self.try_borrow() {
            Ok(value) => value.inspect(cx),
            Err(_) => cx.unavailable("RefCell"),
        }
    }
}

// Locks are only ever tried: the traced program may hold them on this very
// thread.
impl<T: Inspect + ?Sized> Inspect for Mutex<T> {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        match self.try_lock() {
            Ok(guard) => guard.inspect(cx),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().inspect(cx),
            Err(TryLockError::WouldBlock) => cx.unavailable("Mutex"),
        }
    }
}

impl<T: Inspect + ?Sized> Inspect for RwLock<T> {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        match self.try_read() {
            Ok(guard) => guard.inspect(cx),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().inspect(cx),
            Err(TryLockError::WouldBlock) => cx.unavailable("RwLock"),
        }
    }
}

impl<T: Inspect + ?Sized> Inspect for parking_lot::Mutex<T> {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        match self.try_lock() {
            Some(guard) => guard.inspect(cx),
            None => cx.unavailable("Mutex"),
        }
    }
}

impl<T: Inspect + ?Sized> Inspect for parking_lot::RwLock<T> {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        match self.try_read() {
            Some(guard) => guard.inspect(cx),
            None => cx.unavailable("RwLock"),
        }
    }
}

impl Inspect for serde_json::Value {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        use serde_json::Value;
        match self {
            Value::Null => cx.null(),
            Value::Bool(value) => cx.bool(*value),
            Value::Number(number) => {
                if let Some(value) = number.as_i64() {
                    cx.int(value)
                } else if let Some(value) = number.as_u64() {
                    cx.uint(value)
                } else {
                    cx.float(number.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(value) => cx.str(value),
            Value::Array(items) => cx.seq(None, items.iter()),
            Value::Object(entries) => cx.map(None, entries.iter()),
        }
    }
}

macro_rules! resources {
    ($($ty:ty => $name:literal),* $(,)?) => {$(
        impl Inspect for $ty {
            fn inspect(&self, cx: Inspector<'_>) -> Node {
                cx.opaque($name)
            }
        }
    )*};
}

resources!(
    std::fs::File => "File",
    std::net::TcpStream => "TcpStream",
    std::net::TcpListener => "TcpListener",
    std::net::UdpSocket => "UdpSocket",
    std::process::Child => "Child",
    std::thread::Thread => "Thread",
);

impl<T> Inspect for std::thread::JoinHandle<T> {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        cx.opaque("JoinHandle")
    }
}
