use bytemuck::pod_read_unaligned;

/// 计算两个 N 字节二进制向量的汉明距离
#[inline(always)]
pub fn hamming<const N: usize>(va: &[u8; N], vb: &[u8; N]) -> u32 {
    match N {
        32 => hamming_32(va, vb),
        _ => hamming_naive::<N>(va, vb),
    }
}

#[inline(always)]
pub fn hamming_naive<const N: usize>(va: &[u8], vb: &[u8]) -> u32 {
    let mut sum = 0;
    for i in 0..N {
        sum += (va[i] ^ vb[i]).count_ones();
    }
    sum
}

#[inline(always)]
pub fn hamming_32(va: &[u8], vb: &[u8]) -> u32 {
    // 描述符存放在 Vec<[u8; 32]> 中，不保证 8 字节对齐，所以这里按非对齐方式读取
    let mut sum = 0;
    for i in 0..4 {
        let a: u64 = pod_read_unaligned(&va[i * 8..(i + 1) * 8]);
        let b: u64 = pod_read_unaligned(&vb[i * 8..(i + 1) * 8]);
        sum += (a ^ b).count_ones();
    }
    sum
}

/// 计算向量 va 和 vb 中每个向量的汉明距离，并返回距离最小的 k 个 (序号, 距离)
///
/// 结果按距离升序排列，距离相同时序号小的在前
pub fn knn_hamming<const N: usize>(va: &[u8; N], vb: &[[u8; N]], k: usize) -> Vec<(usize, u32)> {
    let mut best: Vec<(usize, u32)> = Vec::with_capacity(k + 1);
    if k == 0 {
        return best;
    }
    for (i, code) in vb.iter().enumerate() {
        let d = hamming::<N>(va, code);
        if best.len() == k && d >= best[k - 1].1 {
            continue;
        }
        // 插入到所有距离不大于 d 的元素之后，保证先出现的序号排在前面
        let pos = best.partition_point(|&(_, bd)| bd <= d);
        best.insert(pos, (i, d));
        best.truncate(k);
    }
    best
}
