//! Tests for platform-agnostic types

use faultline_core::types::{Address, ThreadId};

#[test]
fn test_address_from_u64()
{
    let address = Address::from(0x1000u64);
    assert_eq!(address.value(), 0x1000);
    assert_eq!(u64::from(address), 0x1000);
}

#[test]
fn test_address_display_is_padded_hex()
{
    assert_eq!(Address::new(0xdead).to_string(), "0x000000000000dead");
    assert_eq!(format!("{:x}", Address::new(0xdead)), "dead");
}

#[test]
fn test_address_arithmetic()
{
    let base = Address::new(0x4000);
    assert_eq!(base + 0x10, Address::new(0x4010));
    assert_eq!(base - 0x10, Address::new(0x3ff0));
    assert_eq!((base + 0x24).offset_from(base), Some(0x24));
    assert_eq!(base.offset_from(base + 1), None);
    assert_eq!(Address::new(u64::MAX).checked_add(1), None);
    assert_eq!(Address::ZERO.checked_sub(1), None);
}

#[test]
fn test_address_null()
{
    assert!(Address::ZERO.is_null());
    assert!(Address::default().is_null());
    assert!(!Address::new(1).is_null());
}

#[test]
fn test_address_from_ptr()
{
    let value = 7u32;
    let address = Address::from_ptr(&value);
    assert_eq!(address.as_usize(), std::ptr::addr_of!(value) as usize);
}

#[test]
fn test_thread_id_equality()
{
    let thread1 = ThreadId::from(12345);
    let thread2 = ThreadId(12345);
    let thread3 = ThreadId::from(54321);

    assert_eq!(thread1, thread2);
    assert_ne!(thread1, thread3);
    assert_eq!(thread1.raw(), 12345);
}

#[test]
fn test_thread_id_null()
{
    assert!(ThreadId::NULL.is_null());
    assert!(ThreadId::default().is_null());
    assert_eq!(ThreadId(42).to_string(), "42");
}
