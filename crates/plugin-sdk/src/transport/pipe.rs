//! Named pipe listener for Windows hosts.

use std::io;
use std::mem;
use std::os::windows::io::{FromRawHandle, IntoRawHandle, OwnedHandle, RawHandle};
use std::ptr;

use tokio::net::windows::named_pipe::{NamedPipeServer, ServerOptions};
use tracing::warn;
use windows_sys::Win32::Foundation::{HLOCAL, INVALID_HANDLE_VALUE, LocalFree};
use windows_sys::Win32::Security::Authorization::{
    ConvertStringSecurityDescriptorToSecurityDescriptorW, SDDL_REVISION_1,
};
use windows_sys::Win32::Security::{PSECURITY_DESCRIPTOR, SECURITY_ATTRIBUTES};
use windows_sys::Win32::Storage::FileSystem::{
    FILE_FLAG_FIRST_PIPE_INSTANCE, FILE_FLAG_OVERLAPPED, PIPE_ACCESS_DUPLEX,
};
use windows_sys::Win32::System::Pipes::{
    CreateNamedPipeW, PIPE_READMODE_BYTE, PIPE_TYPE_BYTE, PIPE_UNLIMITED_INSTANCES, PIPE_WAIT,
};

use plugin_sdk_config::PipeConfig;

use super::{LISTENER_TARGET, ListenerError};

/// Bound pipe holding its first instance until a runtime takes it over.
#[derive(Debug)]
pub(crate) struct PipeListener {
    path: String,
    config: PipeConfig,
    security: Option<SecurityDescriptor>,
    first: OwnedHandle,
}

impl PipeListener {
    /// Creates the first pipe instance so clients can connect immediately and
    /// a pipe owned by another process is reported as a bind failure.
    pub(crate) fn bind(address: &str, config: &PipeConfig) -> Result<Self, ListenerError> {
        let path = address.replace('/', "\\");
        let security = config
            .security_descriptor
            .as_deref()
            .map(SecurityDescriptor::from_sddl)
            .transpose()
            .map_err(|source| ListenerError::PipeSecurity {
                address: address.to_owned(),
                source,
            })?;
        let first = create_first_instance(&path, config, security.as_ref()).map_err(|source| {
            ListenerError::CreatePipe {
                address: address.to_owned(),
                source,
            }
        })?;
        Ok(Self {
            path,
            config: config.clone(),
            security,
            first,
        })
    }

    /// Hands the first instance to the current runtime.
    pub(crate) fn into_async(self) -> io::Result<AsyncPipeListener> {
        let Self {
            path,
            config,
            security,
            first,
        } = self;
        // SAFETY: `first` was created in overlapped mode by
        // `create_first_instance` and ownership moves into the pipe server.
        let pending = unsafe { NamedPipeServer::from_raw_handle(first.into_raw_handle()) }?;
        Ok(AsyncPipeListener {
            path,
            config,
            security,
            pending: Some(pending),
        })
    }
}

/// Pipe listener registered with the runtime. One instance is kept pending so
/// clients never observe the pipe as missing between accepts.
#[derive(Debug)]
pub(crate) struct AsyncPipeListener {
    path: String,
    config: PipeConfig,
    security: Option<SecurityDescriptor>,
    pending: Option<NamedPipeServer>,
}

impl AsyncPipeListener {
    /// Waits until a client connects to the pending instance.
    pub(crate) async fn accept(&mut self) -> io::Result<NamedPipeServer> {
        let instance = match self.pending.take() {
            Some(instance) => instance,
            None => self.create_instance()?,
        };
        instance.connect().await?;

        match self.create_instance() {
            Ok(next) => self.pending = Some(next),
            Err(error) => warn!(
                target: LISTENER_TARGET,
                error = %error,
                pipe = %self.path,
                "failed to pre-create next pipe instance"
            ),
        }
        Ok(instance)
    }

    fn create_instance(&self) -> io::Result<NamedPipeServer> {
        let mut options = ServerOptions::new();
        options
            .in_buffer_size(self.config.in_buffer_size)
            .out_buffer_size(self.config.out_buffer_size);
        let Some(descriptor) = &self.security else {
            return options.create(&self.path);
        };
        let mut attributes = descriptor.attributes();
        // SAFETY: `attributes` is a valid SECURITY_ATTRIBUTES on this stack
        // frame and the descriptor it points at lives as long as `self`.
        unsafe {
            options.create_with_security_attributes_raw(
                &self.path,
                ptr::from_mut(&mut attributes).cast(),
            )
        }
    }
}

fn create_first_instance(
    path: &str,
    config: &PipeConfig,
    security: Option<&SecurityDescriptor>,
) -> io::Result<OwnedHandle> {
    let wide_path = to_wide(path);
    let attributes = security.map(SecurityDescriptor::attributes);
    let attributes_ptr = attributes
        .as_ref()
        .map_or(ptr::null(), |attributes| ptr::from_ref(attributes));

    // SAFETY: `wide_path` is NUL-terminated and `attributes_ptr` is null or
    // points at attributes that outlive the call.
    let handle = unsafe {
        CreateNamedPipeW(
            wide_path.as_ptr(),
            PIPE_ACCESS_DUPLEX | FILE_FLAG_FIRST_PIPE_INSTANCE | FILE_FLAG_OVERLAPPED,
            PIPE_TYPE_BYTE | PIPE_READMODE_BYTE | PIPE_WAIT,
            PIPE_UNLIMITED_INSTANCES,
            config.out_buffer_size,
            config.in_buffer_size,
            0,
            attributes_ptr,
        )
    };
    if handle == INVALID_HANDLE_VALUE {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: the handle was just created and is owned by nothing else.
    Ok(unsafe { OwnedHandle::from_raw_handle(handle as RawHandle) })
}

fn to_wide(value: &str) -> Vec<u16> {
    value.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Security descriptor allocated by `ConvertStringSecurityDescriptorToSecurityDescriptorW`.
#[derive(Debug)]
struct SecurityDescriptor(PSECURITY_DESCRIPTOR);

// SAFETY: the descriptor is owned exclusively by this value, never mutated
// after conversion and freed once on drop, so moving it across threads is
// sound.
unsafe impl Send for SecurityDescriptor {}

// SAFETY: shared access only passes the pointer to pipe creation calls, which
// read the descriptor without modifying it.
unsafe impl Sync for SecurityDescriptor {}

impl SecurityDescriptor {
    fn from_sddl(sddl: &str) -> io::Result<Self> {
        let wide = to_wide(sddl);
        let mut descriptor: PSECURITY_DESCRIPTOR = ptr::null_mut();
        // SAFETY: `wide` is NUL-terminated and `descriptor` is a valid out
        // pointer; the optional length out-parameter is null.
        let converted = unsafe {
            ConvertStringSecurityDescriptorToSecurityDescriptorW(
                wide.as_ptr(),
                SDDL_REVISION_1,
                &mut descriptor,
                ptr::null_mut(),
            )
        };
        if converted == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self(descriptor))
    }

    fn attributes(&self) -> SECURITY_ATTRIBUTES {
        SECURITY_ATTRIBUTES {
            nLength: u32::try_from(mem::size_of::<SECURITY_ATTRIBUTES>()).unwrap_or(u32::MAX),
            lpSecurityDescriptor: self.0,
            bInheritHandle: 0,
        }
    }
}

impl Drop for SecurityDescriptor {
    fn drop(&mut self) {
        // SAFETY: the pointer came from a successful conversion call, which
        // allocates with LocalAlloc, and is freed exactly once here.
        unsafe {
            LocalFree(self.0 as HLOCAL);
        }
    }
}
