use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::print::{Finger, Print, PrintData};

/// Keyed storage for opaque per-finger print records.
pub trait PrintStore {
    /// Fails with [`Error::DataNotFound`] when nothing is stored for `finger`.
    fn load(&self, finger: Finger) -> Result<Vec<u8>>;
    fn save(&mut self, finger: Finger, record: &[u8]) -> Result<()>;
    fn delete(&mut self, finger: Finger) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: HashMap<Finger, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl PrintStore for MemoryStore {
    fn load(&self, finger: Finger) -> Result<Vec<u8>> {
        self.records.get(&finger).cloned().ok_or(Error::DataNotFound)
    }

    fn save(&mut self, finger: Finger, record: &[u8]) -> Result<()> {
        self.records.insert(finger, record.to_vec());
        Ok(())
    }

    fn delete(&mut self, finger: Finger) -> Result<()> {
        self.records.remove(&finger).map(|_| ()).ok_or(Error::DataNotFound)
    }
}

/// Saves the record of an enrolled print under its finger.
pub fn save_print(store: &mut dyn PrintStore, print: &Print) -> Result<()> {
    let data = print.data.as_ref().ok_or(Error::DataInvalid)?;
    store.save(print.finger, &data.to_record())
}

/// Rebuilds a device-stored print from the record saved for `finger`.
pub fn load_print(store: &dyn PrintStore, finger: Finger) -> Result<Print> {
    let data = PrintData::from_record(&store.load(finger)?)?;
    let mut print = Print::new(finger);
    print.device_stored = true;
    print.description = Some(String::from_utf8_lossy(&data.user_id).into_owned());
    print.data = Some(data);
    Ok(print)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let mut store = MemoryStore::new();
        assert_eq!(store.load(Finger::LeftIndex), Err(Error::DataNotFound));
        store.save(Finger::LeftIndex, &[1, 2, b'a', b'b']).unwrap();
        assert_eq!(store.load(Finger::LeftIndex).unwrap(), vec![1, 2, b'a', b'b']);
        store.delete(Finger::LeftIndex).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.delete(Finger::LeftIndex), Err(Error::DataNotFound));
    }

    #[test]
    fn prints_survive_the_store() {
        let mut store = MemoryStore::new();
        let mut print = Print::new(Finger::RightThumb);
        print.data = Some(PrintData::new(1, b"FP1-20240101-6-00000000-bob").unwrap());
        save_print(&mut store, &print).unwrap();

        let loaded = load_print(&store, Finger::RightThumb).unwrap();
        assert_eq!(loaded.data, print.data);
        assert!(loaded.device_stored);
    }

    #[test]
    fn prints_without_data_are_refused() {
        let mut store = MemoryStore::new();
        let print = Print::new(Finger::RightThumb);
        assert_eq!(save_print(&mut store, &print), Err(Error::DataInvalid));
    }

    #[test]
    fn corrupted_records_are_invalid() {
        let mut store = MemoryStore::new();
        store.save(Finger::LeftThumb, &[1, 9, b'x']).unwrap();
        assert_eq!(load_print(&store, Finger::LeftThumb), Err(Error::DataInvalid));
    }
}
