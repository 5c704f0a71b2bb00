use std::borrow::Cow;

use super::InvertedLists;

/// 内存中的倒排列表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayInvertedLists<const N: usize> {
    pub codes: Vec<Vec<[u8; N]>>,
    pub ids: Vec<Vec<u64>>,
}

impl<const N: usize> ArrayInvertedLists<N> {
    pub fn new(nlist: usize) -> Self {
        Self { codes: vec![vec![]; nlist], ids: vec![vec![]; nlist] }
    }
}

impl<const N: usize> InvertedLists<N> for ArrayInvertedLists<N> {
    fn nlist(&self) -> usize {
        self.ids.len()
    }

    fn list_len(&self, list_no: usize) -> usize {
        self.ids[list_no].len()
    }

    fn get_list(&self, list_no: usize) -> (Cow<'_, [u64]>, Cow<'_, [[u8; N]]>) {
        (Cow::Borrowed(&self.ids[list_no]), Cow::Borrowed(&self.codes[list_no]))
    }

    fn add_entry(&mut self, list_no: usize, id: u64, code: &[u8; N]) {
        self.ids[list_no].push(id);
        self.codes[list_no].push(*code);
    }

    fn add_entries(&mut self, list_no: usize, ids: &[u64], codes: &[[u8; N]]) {
        assert_eq!(ids.len(), codes.len(), "ids and codes length mismatch");
        self.ids[list_no].extend_from_slice(ids);
        self.codes[list_no].extend_from_slice(codes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_get() {
        let mut lists = ArrayInvertedLists::<4>::new(3);
        lists.add_entry(1, 7, &[1, 2, 3, 4]);
        lists.add_entries(2, &[8, 9], &[[0; 4], [0xff; 4]]);

        assert_eq!(lists.nlist(), 3);
        assert_eq!(lists.list_len(0), 0);
        assert_eq!(lists.ntotal(), 3);
        let (ids, codes) = lists.get_list(2);
        assert_eq!(&*ids, &[8, 9]);
        assert_eq!(codes[1], [0xff; 4]);
    }
}
