mod array_invlists;

use std::borrow::Cow;

pub use array_invlists::*;

use crate::kmodes::imbalance_factor;

pub trait InvertedLists<const N: usize> {
    /// 返回倒排表的列表数量
    fn nlist(&self) -> usize;

    /// 返回指定倒排表的元素数量
    fn list_len(&self, list_no: usize) -> usize;

    /// 返回指定倒排表中向量的 ID 列表和数据
    fn get_list(&self, list_no: usize) -> (Cow<'_, [u64]>, Cow<'_, [[u8; N]]>);

    /// 往指定倒排表中添加一个元素
    fn add_entry(&mut self, list_no: usize, id: u64, code: &[u8; N]);

    /// 往指定倒排表中批量添加元素，注意默认实现会调用 add_entry
    fn add_entries(&mut self, list_no: usize, ids: &[u64], codes: &[[u8; N]]) {
        for (id, code) in ids.iter().zip(codes) {
            self.add_entry(list_no, *id, code);
        }
    }

    /// 所有倒排表的元素总数
    fn ntotal(&self) -> usize {
        (0..self.nlist()).map(|i| self.list_len(i)).sum()
    }

    /// 计算不平衡度
    fn imbalance(&self) -> f32 {
        let hist = (0..self.nlist()).map(|i| self.list_len(i)).collect::<Vec<_>>();
        imbalance_factor(&hist)
    }
}
