//! Device buffers
//!
//! A [`DeviceBuffer`] is a typed, fixed-length handle into accelerator
//! memory. It is deliberately neither `Clone` nor `Copy`: exactly one owner
//! decides when it is released, and [`DeviceBuffer::release`] consumes it so
//! a released buffer cannot be named again.

use crate::backend::{Backend, BufferHandle};
use crate::dispatch::Accelerator;
use crate::error::{DispatchError, DispatchResult};
use crate::naming::OperandType;
use crate::types::{ElementType, HostElement};

#[derive(Debug)]
pub struct DeviceBuffer {
    handle: BufferHandle,
    length: usize,
    element_type: ElementType,
}

impl DeviceBuffer {
    pub(crate) fn from_raw(handle: BufferHandle, length: usize, element_type: ElementType) -> Self {
        Self {
            handle,
            length,
            element_type,
        }
    }

    /// Copy a host array into a new buffer of matching length and type
    pub fn upload<B: Backend, T: HostElement>(
        accelerator: &mut Accelerator<B>,
        data: &[T],
    ) -> DispatchResult<Self> {
        let buffer = Self::allocate(accelerator, data.len(), T::ELEMENT_TYPE)?;
        let queue = accelerator.queue();
        if let Err(e) = accelerator
            .backend_mut()
            .upload_buffer(queue, buffer.handle, T::host_slice(data))
        {
            // Release the allocation but report the upload failure
            let handle = buffer.handle;
            if let Err(release_error) = buffer.release(accelerator) {
                log::warn!("Leaked {} after failed upload: {}", handle, release_error);
            }
            return Err(e);
        }
        Ok(buffer)
    }

    /// Copy `data[index..index + amount]` into a new buffer
    pub fn upload_range<B: Backend, T: HostElement>(
        accelerator: &mut Accelerator<B>,
        data: &[T],
        index: usize,
        amount: usize,
    ) -> DispatchResult<Self> {
        let window = index
            .checked_add(amount)
            .and_then(|end| data.get(index..end))
            .ok_or_else(|| {
                DispatchError::invalid_argument(format!(
                    "range {}..{}+{} exceeds host array of length {}",
                    index,
                    index,
                    amount,
                    data.len()
                ))
            })?;
        Self::upload(accelerator, window)
    }

    /// Overwrite the contents from a host array of the same length and type
    pub fn fill<B: Backend, T: HostElement>(
        &self,
        accelerator: &mut Accelerator<B>,
        data: &[T],
    ) -> DispatchResult<&Self> {
        if data.len() != self.length {
            return Err(DispatchError::length(self.length, data.len()));
        }
        if T::ELEMENT_TYPE != self.element_type {
            return Err(DispatchError::ElementTypeMismatch {
                expected: self.element_type,
                found: T::ELEMENT_TYPE,
            });
        }
        let queue = accelerator.queue();
        accelerator
            .backend_mut()
            .upload_buffer(queue, self.handle, T::host_slice(data))?;
        Ok(self)
    }

    /// Zero-initialised storage
    pub fn allocate<B: Backend>(
        accelerator: &mut Accelerator<B>,
        length: usize,
        element_type: ElementType,
    ) -> DispatchResult<Self> {
        if length == 0 {
            return Err(DispatchError::invalid_argument("buffers must hold at least one element"));
        }
        let context = accelerator.context();
        let handle = accelerator
            .backend_mut()
            .allocate_buffer(context, length, element_type)?;
        log::debug!("Allocated {} ({} x {})", handle, length, element_type);
        Ok(Self::from_raw(handle, length, element_type))
    }

    /// Copy the device contents into a pre-sized host array
    pub fn download<B: Backend, T: HostElement>(
        &self,
        accelerator: &mut Accelerator<B>,
        out: &mut [T],
    ) -> DispatchResult<()> {
        if out.len() != self.length {
            return Err(DispatchError::length(self.length, out.len()));
        }
        if T::ELEMENT_TYPE != self.element_type {
            return Err(DispatchError::ElementTypeMismatch {
                expected: self.element_type,
                found: T::ELEMENT_TYPE,
            });
        }
        let queue = accelerator.queue();
        accelerator
            .backend_mut()
            .download_buffer(queue, self.handle, T::host_slice_mut(out))
    }

    /// Download into a new host vector
    pub fn to_vec<B: Backend, T: HostElement>(
        &self,
        accelerator: &mut Accelerator<B>,
    ) -> DispatchResult<Vec<T>> {
        let mut out = vec![T::default(); self.length];
        self.download(accelerator, &mut out)?;
        Ok(out)
    }

    /// Copy elements `offset..offset + out.len()` into `out`
    pub fn download_range<B: Backend, T: HostElement>(
        &self,
        accelerator: &mut Accelerator<B>,
        offset: usize,
        out: &mut [T],
    ) -> DispatchResult<()> {
        let end = offset
            .checked_add(out.len())
            .filter(|&end| end <= self.length)
            .ok_or_else(|| {
                DispatchError::invalid_argument(format!(
                    "range {}..{}+{} exceeds {} of length {}",
                    offset,
                    offset,
                    out.len(),
                    self.handle,
                    self.length
                ))
            })?;
        let all: Vec<T> = self.to_vec(accelerator)?;
        out.copy_from_slice(&all[offset..end]);
        Ok(())
    }

    /// Free the device storage. The buffer is consumed.
    pub fn release<B: Backend>(self, accelerator: &mut Accelerator<B>) -> DispatchResult<()> {
        log::debug!("Releasing {}", self.handle);
        accelerator.backend_mut().release_buffer(self.handle)
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn operand_type(&self) -> OperandType {
        OperandType::buffer(self.element_type)
    }

    /// Identity comparison: the same device allocation
    pub fn is_same(&self, other: &DeviceBuffer) -> bool {
        self.handle == other.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::EmulatorBackend;
    use pretty_assertions::assert_eq;

    fn accelerator() -> Accelerator<EmulatorBackend> {
        Accelerator::new(EmulatorBackend::default()).unwrap()
    }

    #[test]
    fn test_round_trip_integral() {
        let mut acc = accelerator();
        let data: Vec<i32> = (-50..50).collect();
        let buffer = DeviceBuffer::upload(&mut acc, &data).unwrap();
        assert_eq!(buffer.element_type(), ElementType::Integral);
        assert_eq!(buffer.to_vec::<_, i32>(&mut acc).unwrap(), data);
    }

    #[test]
    fn test_round_trip_floating() {
        let mut acc = accelerator();
        let data = [0.1f32, -2.5, 1e-7, 3.25e9];
        let buffer = DeviceBuffer::upload(&mut acc, &data).unwrap();
        let mut out = [0.0f32; 4];
        buffer.download(&mut acc, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_download_length_mismatch() {
        let mut acc = accelerator();
        let buffer = DeviceBuffer::upload(&mut acc, &[1, 2, 3]).unwrap();
        let mut out = [0; 2];
        assert!(matches!(
            buffer.download(&mut acc, &mut out),
            Err(DispatchError::LengthMismatch { expected: 3, got: 2 })
        ));
    }

    #[test]
    fn test_download_type_mismatch() {
        let mut acc = accelerator();
        let buffer = DeviceBuffer::upload(&mut acc, &[1, 2, 3]).unwrap();
        assert!(matches!(
            buffer.to_vec::<_, f32>(&mut acc),
            Err(DispatchError::ElementTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_allocate_zeroed() {
        let mut acc = accelerator();
        let buffer = DeviceBuffer::allocate(&mut acc, 5, ElementType::Floating).unwrap();
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.to_vec::<_, f32>(&mut acc).unwrap(), vec![0.0; 5]);
    }

    #[test]
    fn test_empty_upload_rejected() {
        let mut acc = accelerator();
        let empty: [f32; 0] = [];
        assert!(matches!(
            DeviceBuffer::upload(&mut acc, &empty),
            Err(DispatchError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_upload_range() {
        let mut acc = accelerator();
        let data = [1.0f32, 2.0, 3.0, 4.0, 5.0];
        let buffer = DeviceBuffer::upload_range(&mut acc, &data, 1, 3).unwrap();
        assert_eq!(buffer.to_vec::<_, f32>(&mut acc).unwrap(), vec![2.0, 3.0, 4.0]);

        assert!(matches!(
            DeviceBuffer::upload_range(&mut acc, &data, 3, 3),
            Err(DispatchError::InvalidArgument { .. })
        ));
        assert!(DeviceBuffer::upload_range(&mut acc, &data, usize::MAX, 2).is_err());
    }

    #[test]
    fn test_download_range() {
        let mut acc = accelerator();
        let buffer = DeviceBuffer::upload(&mut acc, &[10, 20, 30, 40]).unwrap();
        let mut out = [0; 2];
        buffer.download_range(&mut acc, 2, &mut out).unwrap();
        assert_eq!(out, [30, 40]);

        let mut too_far = [0; 3];
        assert!(matches!(
            buffer.download_range(&mut acc, 2, &mut too_far),
            Err(DispatchError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_fill_overwrites_in_place() {
        let mut acc = accelerator();
        let buffer = DeviceBuffer::allocate(&mut acc, 3, ElementType::Integral).unwrap();
        let filled = buffer.fill(&mut acc, &[7, 8, 9]).unwrap();
        assert!(filled.is_same(&buffer));
        assert_eq!(buffer.to_vec::<_, i32>(&mut acc).unwrap(), vec![7, 8, 9]);
        assert_eq!(acc.backend().live_buffers(), 1);

        assert!(matches!(
            buffer.fill(&mut acc, &[1, 2]),
            Err(DispatchError::LengthMismatch { expected: 3, got: 2 })
        ));
        assert!(matches!(
            buffer.fill(&mut acc, &[1.0f32, 2.0, 3.0]),
            Err(DispatchError::ElementTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_release_frees_storage() {
        let mut acc = accelerator();
        let buffer = DeviceBuffer::upload(&mut acc, &[1.0f32]).unwrap();
        let handle = buffer.handle();
        assert_eq!(acc.backend().live_buffers(), 1);
        buffer.release(&mut acc).unwrap();
        assert_eq!(acc.backend().live_buffers(), 0);

        // A forged copy of the released handle is detected
        let forged = DeviceBuffer::from_raw(handle, 1, ElementType::Floating);
        assert!(matches!(
            forged.to_vec::<_, f32>(&mut acc),
            Err(DispatchError::InvalidHandle { .. })
        ));
    }
}
