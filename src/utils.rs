use crate::error::{FovPatchError, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct NdArray<T> {
    data: Vec<T>,
    pub shape: Vec<i32>,
    strides: Vec<usize>
}

fn get_metadata<U: Into<Vec<i32>>>(shape: U) -> (usize, Vec<i32>, Vec<usize>) {
    let shape = shape.into();
    debug_assert!(!shape.is_empty());
    debug_assert!(shape.iter().all(|&s| s >= 0));

    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len()-1).rev() {
        strides[i] = strides[i+1] * (shape[i+1] as usize);
    }

    (strides[0] * (shape[0] as usize), shape, strides)
}

/// Number of elements spanned by `dims`, computed in `usize` so that large
/// patch batches do not wrap around `i32`.
pub fn element_count(dims: &[i32]) -> Result<usize> {
    dims.iter().try_fold(1_usize, |acc, &d| {
        if d < 0 {
            return Err(FovPatchError::Configuration(format!("negative dimension in {:?}", dims)));
        }
        acc.checked_mul(d as usize).ok_or_else(|| FovPatchError::Configuration(format!(
            "{:?} holds more elements than fit into memory", dims)))
    })
}

impl<T> NdArray<T> where T: Copy {
    pub fn new<U: Into<Vec<i32>>>(initial: T, shape: U) -> NdArray<T> {
        let (len, shape, strides) = get_metadata(shape);

        NdArray {
            data: vec![initial; len],
            shape: shape,
            strides: strides
        }
    }

    pub fn from_vec<U: Into<Vec<i32>>>(data: Vec<T>, shape: U) -> Result<NdArray<T>> {
        let (len, shape, strides) = get_metadata(shape);
        if len != data.len() {
            return Err(FovPatchError::ShapeMismatch(format!(
                "buffer of {} elements does not fit shape {:?}", data.len(), shape)));
        }

        Ok(NdArray {
            data: data,
            shape: shape,
            strides: strides
        })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    // (N, C, H, W) of a batch
    pub fn dims4(&self) -> Result<(i32, i32, i32, i32)> {
        if self.shape.len() != 4 {
            return Err(FovPatchError::ShapeMismatch(format!(
                "expected a 4D [N,C,H,W] array, got shape {:?}", self.shape)));
        }

        Ok((self.shape[0], self.shape[1], self.shape[2], self.shape[3]))
    }

    /// Contiguous slab of the `i`-th entry along the first axis.
    pub fn image(&self, i: i32) -> &[T] {
        let begin = (i as usize) * self.strides[0];
        &self.data[begin..begin + self.strides[0]]
    }

    pub fn image_mut(&mut self, i: i32) -> &mut [T] {
        let begin = (i as usize) * self.strides[0];
        let end = begin + self.strides[0];
        &mut self.data[begin..end]
    }

    pub fn map<U: Copy, F: Fn(T) -> U>(&self, f: F) -> NdArray<U> {
        NdArray {
            data: self.data.iter().map(|&v| f(v)).collect(),
            shape: self.shape.clone(),
            strides: self.strides.clone()
        }
    }

    /// Copies the window `[y0, y0+height) x [x0, x0+width)` of every [.., H, W] plane.
    pub fn crop(&self, y0: i32, x0: i32, height: i32, width: i32) -> NdArray<T> {
        let (n, c, h, w) = (self.shape[0], self.shape[1], self.shape[2], self.shape[3]);
        debug_assert_eq!(self.shape.len(), 4);
        debug_assert!(0 <= y0 && y0 + height <= h);
        debug_assert!(0 <= x0 && x0 + width <= w);

        let mut data = Vec::with_capacity((n as usize) * (c as usize) * (height as usize) * (width as usize));
        for i in 0..n {
            for ch in 0..c {
                for y in y0..y0+height {
                    let begin = ((i * c + ch) as usize * (h as usize) + y as usize) * (w as usize) + x0 as usize;
                    data.extend_from_slice(&self.data[begin..begin + (width as usize)]);
                }
            }
        }

        let (_, shape, strides) = get_metadata(vec![n, c, height, width]);
        NdArray {
            data: data,
            shape: shape,
            strides: strides
        }
    }
}

impl<T> NdArray<T> where T: Copy + PartialOrd {
    pub fn min(&self) -> Option<T> {
        let mut iter = self.data.iter();
        let first = *iter.next()?;
        Some(iter.fold(first, |acc, &v| if v < acc { v } else { acc }))
    }

    pub fn max(&self) -> Option<T> {
        let mut iter = self.data.iter();
        let first = *iter.next()?;
        Some(iter.fold(first, |acc, &v| if v > acc { v } else { acc }))
    }
}

impl NdArray<f32> {
    pub fn zeros<U: Into<Vec<i32>>>(shape: U) -> NdArray<f32> {
        NdArray::new(0.0_f32, shape)
    }
}

macro_rules! generate_index_ops {
    ( compute_index: $s: ident, $i: ident, $n: literal -> $result: ident ) => {
        let mut $result = $i[$n-1] as usize;
        for i in 0..$n-1 {
            $result += ($i[i] as usize) * $s.strides[i];
        }
    };

    ( $n: literal, $t: ty ) => {
        impl<T> std::ops::Index<[$t; $n]> for NdArray<T> {
            type Output = T;

            fn index(&self, i: [$t; $n]) -> &Self::Output {
                debug_assert_eq!(self.shape.len(), $n);
                generate_index_ops!(compute_index: self, i, $n -> result);
                &self.data[result]
            }
        }

        impl<T> std::ops::IndexMut<[$t; $n]> for NdArray<T> {
            fn index_mut(&mut self, i: [$t; $n]) -> &mut Self::Output {
                debug_assert_eq!(self.shape.len(), $n);
                generate_index_ops!(compute_index: self, i, $n -> result);
                &mut self.data[result]
            }
        }
    };

    ( $t: ty ) => {
        impl<T> std::ops::Index<$t> for NdArray<T> {
            type Output = T;

            fn index(&self, i: $t) -> &Self::Output {
                debug_assert_eq!(self.shape.len(), 1);
                &self.data[i as usize]
            }
        }

        impl<T> std::ops::IndexMut<$t> for NdArray<T> {
            fn index_mut(&mut self, i: $t) -> &mut Self::Output {
                debug_assert_eq!(self.shape.len(), 1);
                &mut self.data[i as usize]
            }
        }

        generate_index_ops!(1, $t);
        generate_index_ops!(2, $t);
        generate_index_ops!(3, $t);
        generate_index_ops!(4, $t);
        generate_index_ops!(5, $t);
    }
}

generate_index_ops!(i32);
generate_index_ops!(usize);

macro_rules! ndarray {
    ( new: $name: ident -> $initial: expr; [ $($shape: expr),+ ] ) => {
        let mut $name = NdArray::new($initial, vec![ $($shape),+ ] );
    };

    ( new: $name: ident -> $initial: expr; $shape: expr ) => {
        let mut $name = NdArray::new($initial, $shape );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strides_follow_row_major_layout() {
        let a = NdArray::from_vec((0..24).collect::<Vec<i32>>(), vec![2, 3, 4]).unwrap();
        assert_eq!(a[[0, 0, 3]], 3);
        assert_eq!(a[[0, 1, 0]], 4);
        assert_eq!(a[[1, 0, 0]], 12);
        assert_eq!(a[[1, 2, 3]], 23);
    }

    #[test]
    fn rank_one_arrays_index_like_vectors() {
        let mut a = NdArray::from_vec(vec![3, 1, 4], vec![3]).unwrap();
        a[[1_i32]] = 5;
        assert_eq!(a[[1_usize]], 5);
        assert_eq!(a[2_i32], 4);
    }

    #[test]
    fn element_count_does_not_wrap_i32() {
        // 505x505 tiles of 96x96 from one 600x600 image at stride 1
        assert_eq!(element_count(&[255_025, 1, 96, 96]).unwrap(), 2_350_310_400);
        assert_eq!(element_count(&[40, 3780, 3, 96, 96]).unwrap(), 4_180_377_600);
        assert!(matches!(element_count(&[i32::MAX; 4]), Err(FovPatchError::Configuration(_))));
        assert!(element_count(&[2, -1]).is_err());
    }

    #[test]
    fn from_vec_rejects_wrong_length() {
        let err = NdArray::from_vec(vec![0.0_f32; 5], vec![2, 3]).unwrap_err();
        assert!(matches!(err, FovPatchError::ShapeMismatch(_)));
    }

    #[test]
    fn crop_keeps_requested_window() {
        let a = NdArray::from_vec((0..32).collect::<Vec<i32>>(), vec![2, 1, 4, 4]).unwrap();
        let c = a.crop(1, 1, 2, 3);
        assert_eq!(c.shape, vec![2, 1, 2, 3]);
        assert_eq!(c.as_slice(), &[5, 6, 7, 9, 10, 11, 21, 22, 23, 25, 26, 27]);
    }

    #[test]
    fn image_slab_covers_one_batch_entry() {
        ndarray!(new: a -> 0_u8; [3, 1, 2, 2]);
        a.image_mut(1).iter_mut().for_each(|v| *v = 7);
        assert_eq!(a.image(0), &[0, 0, 0, 0]);
        assert_eq!(a.image(1), &[7, 7, 7, 7]);
        assert_eq!(a.image(2), &[0, 0, 0, 0]);
        assert_eq!(a.max(), Some(7));
        assert_eq!(a.min(), Some(0));
    }
}
