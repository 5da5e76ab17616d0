//! Capture for any `serde::Serialize` value.
//!
//! The serializer builds the node tree directly and never descends past the
//! depth cap or keeps more than `max_items` children, so a huge or deeply
//! recursive `Serialize` impl stays bounded. A container that has skipped
//! `max_items` children stops its `Serialize` impl early by returning
//! [`SerializeError::Stop`] with the node built so far.

use std::any::type_name;
use std::error::Error;
use std::fmt::{self, Display};
use std::mem;

use serde::ser::{self, Serialize};
use specimen_types::{Entry, Mapping, Node, OpaqueKind, Sequence};

use crate::adapters::bounded_text;
use crate::{Inspect, Inspector, guarded, short_type_name};

/// Captures any `Serialize` value through its serde data model.
pub struct Serialized<'a, T: ?Sized>(pub &'a T);

impl<T: Serialize + ?Sized> Inspect for Serialized<'_, T> {
    fn inspect(&self, cx: Inspector<'_>) -> Node {
        serialize_node(cx, self.0)
    }
}

fn serialize_node<T: Serialize + ?Sized>(cx: Inspector<'_>, value: &T) -> Node {
    match value.serialize(NodeSerializer { cx }) {
        Ok(node) => node,
        Err(SerializeError::Stop(node)) => *node,
        Err(SerializeError::Custom(_)) => {
            Node::opaque(OpaqueKind::Unavailable, short_type_name(type_name::<T>()))
        }
    }
}

#[derive(Debug)]
pub enum SerializeError {
    /// Raised by the value's own `Serialize` impl.
    Custom(String),
    /// The container has seen enough. Carries the node that stands for it.
    Stop(Box<Node>),
}

impl Display for SerializeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(msg) => f.write_str(msg),
            Self::Stop(_) => f.write_str("container cut at the item cap"),
        }
    }
}

impl Error for SerializeError {}

impl ser::Error for SerializeError {
    fn custom<M: Display>(msg: M) -> Self {
        Self::Custom(msg.to_string())
    }
}

struct NodeSerializer<'a> {
    cx: Inspector<'a>,
}

impl<'a> ser::Serializer for NodeSerializer<'a> {
    type Ok = Node;
    type Error = SerializeError;
    type SerializeSeq = SeqCollector<'a>;
    type SerializeTuple = SeqCollector<'a>;
    type SerializeTupleStruct = SeqCollector<'a>;
    type SerializeTupleVariant = SeqCollector<'a>;
    type SerializeMap = MapCollector<'a>;
    type SerializeStruct = MapCollector<'a>;
    type SerializeStructVariant = MapCollector<'a>;

    fn serialize_bool(self, v: bool) -> Result<Node, SerializeError> {
        Ok(self.cx.bool(v))
    }

    fn serialize_i8(self, v: i8) -> Result<Node, SerializeError> {
        Ok(self.cx.int(i64::from(v)))
    }

    fn serialize_i16(self, v: i16) -> Result<Node, SerializeError> {
        Ok(self.cx.int(i64::from(v)))
    }

    fn serialize_i32(self, v: i32) -> Result<Node, SerializeError> {
        Ok(self.cx.int(i64::from(v)))
    }

    fn serialize_i64(self, v: i64) -> Result<Node, SerializeError> {
        Ok(self.cx.int(v))
    }

    fn serialize_i128(self, v: i128) -> Result<Node, SerializeError> {
        Ok(v.inspect(self.cx))
    }

    fn serialize_u8(self, v: u8) -> Result<Node, SerializeError> {
        Ok(self.cx.uint(u64::from(v)))
    }

    fn serialize_u16(self, v: u16) -> Result<Node, SerializeError> {
        Ok(self.cx.uint(u64::from(v)))
    }

    fn serialize_u32(self, v: u32) -> Result<Node, SerializeError> {
        Ok(self.cx.uint(u64::from(v)))
    }

    fn serialize_u64(self, v: u64) -> Result<Node, SerializeError> {
        Ok(self.cx.uint(v))
    }

    fn serialize_u128(self, v: u128) -> Result<Node, SerializeError> {
        Ok(v.inspect(self.cx))
    }

    fn serialize_f32(self, v: f32) -> Result<Node, SerializeError> {
        Ok(self.cx.float(f64::from(v)))
    }

    fn serialize_f64(self, v: f64) -> Result<Node, SerializeError> {
        Ok(self.cx.float(v))
    }

    fn serialize_char(self, v: char) -> Result<Node, SerializeError> {
        Ok(v.inspect(self.cx))
    }

    fn serialize_str(self, v: &str) -> Result<Node, SerializeError> {
        Ok(self.cx.str(v))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Node, SerializeError> {
        Ok(self.cx.bytes(v))
    }

    fn serialize_none(self) -> Result<Node, SerializeError> {
        Ok(self.cx.null())
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<Node, SerializeError> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Node, SerializeError> {
        Ok(self.cx.null())
    }

    fn serialize_unit_struct(self, name: &'static str) -> Result<Node, SerializeError> {
        Ok(self.cx.str(name))
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<Node, SerializeError> {
        Ok(self.cx.str(variant))
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Node, SerializeError> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Node, SerializeError> {
        let mut seq = SeqCollector::new(self.cx, Some(variant), Some(1));
        ser::SerializeTupleVariant::serialize_field(&mut seq, value)?;
        ser::SerializeTupleVariant::end(seq)
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SeqCollector<'a>, SerializeError> {
        Ok(SeqCollector::new(self.cx, None, len))
    }

    fn serialize_tuple(self, len: usize) -> Result<SeqCollector<'a>, SerializeError> {
        Ok(SeqCollector::new(self.cx, Some("tuple"), Some(len)))
    }

    fn serialize_tuple_struct(
        self,
        name: &'static str,
        len: usize,
    ) -> Result<SeqCollector<'a>, SerializeError> {
        Ok(SeqCollector::new(self.cx, Some(name), Some(len)))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<SeqCollector<'a>, SerializeError> {
        Ok(SeqCollector::new(self.cx, Some(variant), Some(len)))
    }

    fn serialize_map(self, len: Option<usize>) -> Result<MapCollector<'a>, SerializeError> {
        Ok(MapCollector::new(self.cx, None, len))
    }

    fn serialize_struct(
        self,
        name: &'static str,
        len: usize,
    ) -> Result<MapCollector<'a>, SerializeError> {
        Ok(MapCollector::new(self.cx, Some(name), Some(len)))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<MapCollector<'a>, SerializeError> {
        Ok(MapCollector::new(self.cx, Some(variant), Some(len)))
    }

    fn collect_str<T: Display + ?Sized>(self, value: &T) -> Result<Node, SerializeError> {
        let max_chars = self.cx.string_cap();
        Ok(bounded_text(max_chars, |out| {
            fmt::Write::write_fmt(out, format_args!("{value}"))
        }))
    }
}

/// Children past the cap are counted but never serialized. After
/// `max_items` of them, or at the first child of a container below the depth
/// cap, the collector stops the walk.
struct SeqCollector<'a> {
    cx: Inspector<'a>,
    type_name: Option<&'static str>,
    len: Option<usize>,
    collapsed: bool,
    items: Vec<Node>,
    omitted: usize,
}

impl<'a> SeqCollector<'a> {
    fn new(cx: Inspector<'a>, type_name: Option<&'static str>, len: Option<usize>) -> Self {
        let collapsed = cx.depth() >= cx.limits().max_depth;
        Self {
            cx,
            type_name,
            len,
            collapsed,
            items: Vec::new(),
            omitted: 0,
        }
    }

    fn push<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), SerializeError> {
        let max_items = self.cx.limits().max_items;
        if self.collapsed {
            return Err(SerializeError::Stop(Box::new(self.node())));
        }
        if self.items.len() >= max_items {
            self.omitted += 1;
            if self.omitted >= max_items {
                return Err(SerializeError::Stop(Box::new(self.node())));
            }
            return Ok(());
        }
        let child = self.cx.child(false);
        let node = guarded(child, short_type_name(type_name::<T>()), |cx| {
            serialize_node(cx, value)
        });
        self.items.push(node);
        Ok(())
    }

    fn node(&mut self) -> Node {
        if self.collapsed {
            return Node::opaque(OpaqueKind::Depth, self.type_name.unwrap_or("array"));
        }
        let items = mem::take(&mut self.items);
        Node::Sequence(Sequence {
            type_name: self.type_name.map(str::to_string),
            omitted: remaining(self.len, items.len(), self.omitted),
            items,
        })
    }

    fn finish(mut self) -> Result<Node, SerializeError> {
        Ok(self.node())
    }
}

/// Children not kept: what the size hint says is left, or at least what was
/// counted.
fn remaining(len: Option<usize>, kept: usize, counted: usize) -> usize {
    len.map_or(counted, |len| len.saturating_sub(kept)).max(counted)
}

impl ser::SerializeSeq for SeqCollector<'_> {
    type Ok = Node;
    type Error = SerializeError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), SerializeError> {
        self.push(value)
    }

    fn end(self) -> Result<Node, SerializeError> {
        self.finish()
    }
}

impl ser::SerializeTuple for SeqCollector<'_> {
    type Ok = Node;
    type Error = SerializeError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), SerializeError> {
        self.push(value)
    }

    fn end(self) -> Result<Node, SerializeError> {
        self.finish()
    }
}

impl ser::SerializeTupleStruct for SeqCollector<'_> {
    type Ok = Node;
    type Error = SerializeError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), SerializeError> {
        self.push(value)
    }

    fn end(self) -> Result<Node, SerializeError> {
        self.finish()
    }
}

impl ser::SerializeTupleVariant for SeqCollector<'_> {
    type Ok = Node;
    type Error = SerializeError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), SerializeError> {
        self.push(value)
    }

    fn end(self) -> Result<Node, SerializeError> {
        self.finish()
    }
}

struct MapCollector<'a> {
    cx: Inspector<'a>,
    type_name: Option<&'static str>,
    len: Option<usize>,
    collapsed: bool,
    entries: Vec<Entry>,
    pending_key: Option<Node>,
    skipping_value: bool,
    omitted: usize,
}

impl<'a> MapCollector<'a> {
    fn new(cx: Inspector<'a>, type_name: Option<&'static str>, len: Option<usize>) -> Self {
        let collapsed = cx.depth() >= cx.limits().max_depth;
        Self {
            cx,
            type_name,
            len,
            collapsed,
            entries: Vec::new(),
            pending_key: None,
            skipping_value: false,
            omitted: 0,
        }
    }

    /// Counts one skipped entry, or stops the walk once enough were skipped.
    fn skip(&mut self) -> Result<(), SerializeError> {
        let max_items = self.cx.limits().max_items;
        if !self.collapsed {
            self.omitted += 1;
        }
        if self.collapsed || self.omitted >= max_items {
            return Err(SerializeError::Stop(Box::new(self.node())));
        }
        Ok(())
    }

    fn full(&self) -> bool {
        self.collapsed || self.entries.len() >= self.cx.limits().max_items
    }

    fn child_node<T: Serialize + ?Sized>(&mut self, value: &T, key: bool) -> Node {
        let child = self.cx.child(key);
        guarded(child, short_type_name(type_name::<T>()), |cx| {
            serialize_node(cx, value)
        })
    }

    fn key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), SerializeError> {
        if self.full() {
            self.skipping_value = true;
            return self.skip();
        }
        self.skipping_value = false;
        self.pending_key = Some(self.child_node(key, true));
        Ok(())
    }

    fn value<T: Serialize + ?Sized>(&mut self, value: &T) {
        if self.skipping_value {
            return;
        }
        let key = self.pending_key.take().unwrap_or_else(Node::null);
        let value = self.child_node(value, false);
        self.entries.push(Entry { key, value });
    }

    fn field<T: Serialize + ?Sized>(
        &mut self,
        name: &'static str,
        value: &T,
    ) -> Result<(), SerializeError> {
        if self.full() {
            return self.skip();
        }
        let key = self.cx.child(true).str(name);
        let value = self.child_node(value, false);
        self.entries.push(Entry { key, value });
        Ok(())
    }

    fn node(&mut self) -> Node {
        if self.collapsed {
            return Node::opaque(OpaqueKind::Depth, self.type_name.unwrap_or("map"));
        }
        let entries = mem::take(&mut self.entries);
        Node::Mapping(Mapping {
            type_name: self.type_name.map(str::to_string),
            omitted: remaining(self.len, entries.len(), self.omitted),
            entries,
        })
    }

    fn finish(mut self) -> Result<Node, SerializeError> {
        Ok(self.node())
    }
}

impl ser::SerializeMap for MapCollector<'_> {
    type Ok = Node;
    type Error = SerializeError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), SerializeError> {
        self.key(key)
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), SerializeError> {
        self.value(value);
        Ok(())
    }

    fn end(self) -> Result<Node, SerializeError> {
        self.finish()
    }
}

impl ser::SerializeStruct for MapCollector<'_> {
    type Ok = Node;
    type Error = SerializeError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), SerializeError> {
        self.field(key, value)
    }

    fn end(self) -> Result<Node, SerializeError> {
        self.finish()
    }
}

impl ser::SerializeStructVariant for MapCollector<'_> {
    type Ok = Node;
    type Error = SerializeError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), SerializeError> {
        self.field(key, value)
    }

    fn end(self) -> Result<Node, SerializeError> {
        self.finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::BTreeMap;

    use serde::Serialize;
    use serde::ser::{SerializeMap, SerializeSeq};
    use specimen_types::{Limits, Scalar};

    use super::*;
    use crate::capture;

    #[derive(Serialize)]
    struct Request {
        method: &'static str,
        path: String,
        headers: BTreeMap<&'static str, &'static str>,
        body: Option<Vec<u8>>,
    }

    #[derive(Serialize)]
    enum Shape {
        Unit,
        Circle(f64),
        Rect { w: u32, h: u32 },
    }

    #[test]
    fn struct_becomes_named_mapping() {
        let request = Request {
            method: "GET",
            path: "/users/7".into(),
            headers: [("accept", "text/html")].into_iter().collect(),
            body: None,
        };
        let snapshot = capture(&Serialized(&request), Limits::FULL);
        let Node::Mapping(map) = snapshot.root() else {
            panic!("expected mapping, got {:?}", snapshot.root());
        };
        assert_eq!(map.type_name.as_deref(), Some("Request"));
        assert_eq!(map.entries.len(), 4);
        assert_eq!(map.entries[0].key, Node::text("method"));
        assert_eq!(map.entries[0].value, Node::text("GET"));
        assert_eq!(map.entries[3].value, Node::null());
        let Node::Mapping(headers) = &map.entries[2].value else {
            panic!("headers must be a mapping");
        };
        assert_eq!(headers.type_name, None);
        assert_eq!(headers.entries[0].key, Node::text("accept"));
    }

    #[test]
    fn enum_variants_keep_their_names() {
        let shapes = vec![Shape::Unit, Shape::Circle(1.5), Shape::Rect { w: 2, h: 3 }];
        let snapshot = capture(&Serialized(&shapes), Limits::FULL);
        let Node::Sequence(seq) = snapshot.root() else {
            panic!("expected sequence");
        };
        assert_eq!(seq.items[0], Node::text("Unit"));
        let Node::Sequence(circle) = &seq.items[1] else {
            panic!("newtype variant must be a sequence");
        };
        assert_eq!(circle.type_name.as_deref(), Some("Circle"));
        assert_eq!(circle.items, vec![Node::Scalar(Scalar::Float(1.5))]);
        let Node::Mapping(rect) = &seq.items[2] else {
            panic!("struct variant must be a mapping");
        };
        assert_eq!(rect.type_name.as_deref(), Some("Rect"));
        assert_eq!(rect.entries.len(), 2);
    }

    #[test]
    fn item_cap_counts_without_serializing() {
        let values: Vec<u32> = (0..50).collect();
        let limits = Limits {
            max_items: 4,
            ..Limits::FULL
        };
        let snapshot = capture(&Serialized(&values), limits);
        let Node::Sequence(seq) = snapshot.root() else {
            panic!("expected sequence");
        };
        assert_eq!(seq.items.len(), 4);
        assert_eq!(seq.omitted, 46);
    }

    #[test]
    fn depth_cap_collapses_nested_containers() {
        let nested = serde_json::json!([[[[["bottom"]]]]]);
        let limits = Limits {
            max_depth: 2,
            ..Limits::FULL
        };
        let snapshot = capture(&Serialized(&nested), limits);
        assert_eq!(snapshot.depth(), 2);
        assert_eq!(snapshot.count_opaque(OpaqueKind::Depth), 1);
    }

    struct Failing;

    impl Serialize for Failing {
        fn serialize<S: serde::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(ser::Error::custom("refusing to serialize"))
        }
    }

    #[test]
    fn serialize_errors_degrade_only_the_failing_subtree() {
        let values: (u8, Failing) = (1, Failing);
        let snapshot = capture(&Serialized(&values), Limits::FULL);
        let Node::Sequence(seq) = snapshot.root() else {
            panic!("expected sequence");
        };
        assert_eq!(seq.items[0], Node::Scalar(Scalar::UInt(1)));
        assert_eq!(
            seq.items[1].as_opaque().map(|opaque| opaque.kind),
            Some(OpaqueKind::Unavailable)
        );
    }

    /// A long sequence that records how many elements were asked for.
    struct Counted {
        len: usize,
        hint: bool,
        visited: Cell<usize>,
    }

    impl Serialize for Counted {
        fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let mut seq = serializer.serialize_seq(self.hint.then_some(self.len))?;
            for i in 0..self.len {
                self.visited.set(self.visited.get() + 1);
                seq.serialize_element(&i)?;
            }
            seq.end()
        }
    }

    #[test]
    fn long_sequences_stop_early_after_the_cap() {
        let limits = Limits {
            max_items: 4,
            ..Limits::FULL
        };
        let values = Counted {
            len: 1_000_000,
            hint: true,
            visited: Cell::new(0),
        };
        let snapshot = capture(&Serialized(&values), limits);
        let Node::Sequence(seq) = snapshot.root() else {
            panic!("expected sequence, got {:?}", snapshot.root());
        };
        assert_eq!(seq.items.len(), 4);
        assert_eq!(seq.omitted, 1_000_000 - 4);
        assert_eq!(values.visited.get(), 8);
    }

    #[test]
    fn unsized_sequences_report_what_they_counted() {
        let limits = Limits {
            max_items: 4,
            ..Limits::FULL
        };
        let values = Counted {
            len: 1_000_000,
            hint: false,
            visited: Cell::new(0),
        };
        let snapshot = capture(&Serialized(&values), limits);
        let Node::Sequence(seq) = snapshot.root() else {
            panic!("expected sequence");
        };
        assert_eq!(seq.items.len(), 4);
        assert_eq!(seq.omitted, 4);
        assert_eq!(values.visited.get(), 8);
    }

    struct CountedMap {
        len: usize,
        visited: Cell<usize>,
    }

    impl Serialize for CountedMap {
        fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let mut map = serializer.serialize_map(Some(self.len))?;
            for i in 0..self.len {
                self.visited.set(self.visited.get() + 1);
                map.serialize_entry(&i, &i)?;
            }
            map.end()
        }
    }

    #[test]
    fn long_maps_stop_early_after_the_cap() {
        let limits = Limits {
            max_items: 3,
            ..Limits::FULL
        };
        let map = CountedMap {
            len: 500_000,
            visited: Cell::new(0),
        };
        let snapshot = capture(&Serialized(&map), limits);
        let Node::Mapping(mapping) = snapshot.root() else {
            panic!("expected mapping");
        };
        assert_eq!(mapping.entries.len(), 3);
        assert_eq!(mapping.omitted, 500_000 - 3);
        assert_eq!(map.visited.get(), 6);
    }

    #[test]
    fn collapsed_containers_do_not_walk_their_children() {
        let limits = Limits {
            max_depth: 1,
            ..Limits::FULL
        };
        let inner = Counted {
            len: 1_000,
            hint: true,
            visited: Cell::new(0),
        };
        let snapshot = capture(&Serialized(&(&inner,)), limits);
        assert_eq!(snapshot.count_opaque(OpaqueKind::Depth), 1);
        assert_eq!(inner.visited.get(), 1);
    }

    /// Serializes through `collect_str`, like ids and addresses often do.
    struct Tag(&'static str);

    impl Serialize for Tag {
        fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_str(self.0)
        }
    }

    struct TaggedCounts;

    impl Serialize for TaggedCounts {
        fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let mut map = serializer.serialize_map(Some(1))?;
            map.serialize_entry(&Tag("a-rather-long-key"), &Tag("a-rather-long-value"))?;
            map.end()
        }
    }

    #[test]
    fn displayed_keys_use_the_key_string_cap() {
        let limits = Limits {
            max_string: 100,
            max_key_string: 4,
            ..Limits::FULL
        };
        let snapshot = capture(&Serialized(&TaggedCounts), limits);
        let Node::Mapping(map) = snapshot.root() else {
            panic!("expected mapping, got {:?}", snapshot.root());
        };
        let Node::Scalar(Scalar::Str(key)) = &map.entries[0].key else {
            panic!("expected text key");
        };
        assert_eq!(key.value, "a-ra");
        assert!(key.is_truncated());
        let Node::Scalar(Scalar::Str(value)) = &map.entries[0].value else {
            panic!("expected text value");
        };
        assert_eq!(value.value, "a-rather-long-value");
        assert!(!value.is_truncated());
    }
}
