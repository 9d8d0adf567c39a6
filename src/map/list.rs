use super::{KeyPart, KeySchema, Map, MapError, MapOptions, MapValue};

/// Append-only sequence stored in a [`Map`] keyed by position.
///
/// The underlying map never wraps, so pushing onto a full list fails with
/// [`MapError::CapacityExhausted`] instead of dropping the first element.
/// Capacity 0 grows without bound.
pub struct List<V: MapValue> {
    map: Map<V>,
}

impl<V: MapValue> List<V> {
    pub fn new(capacity: usize, params: V::Params) -> Result<Self, MapError> {
        let options = MapOptions::with_capacity(capacity).wrap(false);
        Ok(Self {
            map: Map::new(options, KeySchema::int(), params)?,
        })
    }

    /// Appends `input` under the key equal to the current length.
    pub fn push(&mut self, input: V::Input<'_>) -> Result<(), MapError> {
        let index = self.map.len() as i64;
        self.map.set(&[KeyPart::Int(index)], input)
    }

    pub fn get(&self, index: usize) -> Option<&V> {
        self.map.get(&[KeyPart::Int(index as i64)])
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Elements in push order.
    pub fn iter(&self) -> impl Iterator<Item = &V> + '_ {
        self.map.iter().map(|(_, v)| v)
    }

    /// The backing map, for sorting and printing.
    pub fn as_map(&self) -> &Map<V> {
        &self.map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::BoundedString;

    #[test]
    fn test_push_keys_by_position() {
        let mut list = List::<i64>::new(4, ()).expect("list");
        for v in [30, 10, 20] {
            list.push(v).expect("push");
        }

        assert_eq!(list.len(), 3);
        assert_eq!(list.get(0), Some(&30));
        assert_eq!(list.get(2), Some(&20));
        assert_eq!(list.get(3), None);
        assert_eq!(list.iter().copied().collect::<Vec<_>>(), vec![30, 10, 20]);

        let keys: Vec<i64> = list.as_map().iter().filter_map(|(k, _)| k.int(0)).collect();
        assert_eq!(keys, vec![0, 1, 2]);
    }

    #[test]
    fn test_full_list_does_not_wrap() {
        let mut list = List::<BoundedString>::new(2, 8).expect("list");
        list.push("a").expect("push");
        list.push("b").expect("push");

        assert_eq!(
            list.push("c"),
            Err(MapError::CapacityExhausted { capacity: 2 })
        );
        assert_eq!(list.len(), 2);
        assert_eq!(list.get(0).map(BoundedString::as_str), Some("a"));
    }

    #[test]
    fn test_clear_restarts_positions() {
        let mut list = List::<i64>::new(2, ()).expect("list");
        list.push(1).expect("push");
        list.push(2).expect("push");
        list.clear();
        assert!(list.is_empty());

        list.push(7).expect("push after clear");
        assert_eq!(list.get(0), Some(&7));
    }

    #[test]
    fn test_unbounded_list_grows() {
        let mut list = List::<i64>::new(0, ()).expect("list");
        for v in 0..100 {
            list.push(v).expect("push");
        }
        assert_eq!(list.len(), 100);
        assert_eq!(list.get(99), Some(&99));
    }
}
