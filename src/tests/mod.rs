//! Session synchronizer and campus API tests built on in-process fakes
