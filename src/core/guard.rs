use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use super::traits::{ExecutionExtension, ExtensionHandle};

/// Holds at most one execution extension while uploads are outstanding.
pub struct ExtensionGuard {
    extension: Arc<dyn ExecutionExtension>,
    held: Arc<Mutex<Option<ExtensionHandle>>>,
}

/// Per-grant state shared with that grant's expiry callback.
#[derive(Default)]
struct Grant {
    handle: Option<ExtensionHandle>,
    expired: bool,
}

impl ExtensionGuard {
    pub fn new(extension: Arc<dyn ExecutionExtension>) -> Self {
        Self {
            extension,
            held: Arc::new(Mutex::new(None)),
        }
    }

    /// Host is about to suspend. Returns whether an extension is held afterwards.
    pub fn on_suspend(&self, has_outstanding: bool) -> bool {
        if !has_outstanding {
            return false;
        }

        if self.held.lock().is_some() {
            return true;
        }

        let grant = Arc::new(Mutex::new(Grant::default()));
        let on_expire = {
            let grant = grant.clone();
            let held = self.held.clone();
            let extension = self.extension.clone();
            Box::new(move || {
                let expired = {
                    let mut grant = grant.lock();
                    grant.expired = true;
                    let mut held = held.lock();
                    match grant.handle {
                        // 只释放本次授予的句柄
                        Some(handle) if *held == Some(handle) => held.take(),
                        _ => None,
                    }
                };

                if let Some(handle) = expired {
                    warn!(handle = handle.0, "Execution extension expired before uploads finished");
                    extension.release(handle);
                }
            })
        };

        // 不能持锁调用：宿主可能同步触发过期回调
        let Some(handle) = self.extension.request_extension(on_expire) else {
            warn!("Host refused execution extension");
            return false;
        };

        let installed = {
            let mut grant = grant.lock();
            let mut held = self.held.lock();
            if grant.expired || held.is_some() {
                false
            } else {
                grant.handle = Some(handle);
                *held = Some(handle);
                true
            }
        };

        if !installed {
            self.extension.release(handle);
            return self.is_held();
        }

        info!(handle = handle.0, "Execution extension granted");
        true
    }

    /// Host resumed, or nothing is left to finish.
    pub fn release(&self) {
        let handle = self.held.lock().take();
        if let Some(handle) = handle {
            debug!(handle = handle.0, "Releasing execution extension");
            self.extension.release(handle);
        }
    }

    /// Called after every worker finishes.
    pub fn after_worker(&self, has_outstanding: bool) {
        if !has_outstanding {
            self.release();
        }
    }

    pub fn is_held(&self) -> bool {
        self.held.lock().is_some()
    }
}

/// For hosts without process suspension: grants every request, never expires.
#[derive(Default)]
pub struct NoopExtension {
    next: AtomicU64,
}

impl ExecutionExtension for NoopExtension {
    fn request_extension(&self, _on_expire: super::traits::ExpiryFn) -> Option<ExtensionHandle> {
        Some(ExtensionHandle(self.next.fetch_add(1, Ordering::Relaxed)))
    }

    fn release(&self, _handle: ExtensionHandle) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::traits::ExpiryFn;

    #[derive(Default)]
    struct RecordingExtension {
        granted: AtomicU64,
        released: Mutex<Vec<ExtensionHandle>>,
        expiries: Mutex<Vec<ExpiryFn>>,
        expire_immediately: bool,
    }

    impl ExecutionExtension for RecordingExtension {
        fn request_extension(&self, on_expire: ExpiryFn) -> Option<ExtensionHandle> {
            let handle = ExtensionHandle(self.granted.fetch_add(1, Ordering::SeqCst));
            if self.expire_immediately {
                on_expire();
            } else {
                self.expiries.lock().push(on_expire);
            }
            Some(handle)
        }

        fn release(&self, handle: ExtensionHandle) {
            self.released.lock().push(handle);
        }
    }

    #[test]
    fn test_suspend_without_work_requests_nothing() {
        let extension = Arc::new(RecordingExtension::default());
        let guard = ExtensionGuard::new(extension.clone());

        assert!(!guard.on_suspend(false));
        assert_eq!(extension.granted.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_extension_released_when_work_drains() {
        let extension = Arc::new(RecordingExtension::default());
        let guard = ExtensionGuard::new(extension.clone());

        assert!(guard.on_suspend(true));
        assert!(guard.on_suspend(true));
        assert_eq!(extension.granted.load(Ordering::SeqCst), 1);

        guard.after_worker(true);
        assert!(guard.is_held());

        guard.after_worker(false);
        assert!(!guard.is_held());
        assert_eq!(*extension.released.lock(), vec![ExtensionHandle(0)]);
    }

    #[test]
    fn test_expiry_releases_held_extension() {
        let extension = Arc::new(RecordingExtension::default());
        let guard = ExtensionGuard::new(extension.clone());
        guard.on_suspend(true);

        let expire = extension.expiries.lock().pop().unwrap();
        expire();

        assert!(!guard.is_held());
        assert_eq!(extension.released.lock().len(), 1);

        // 已经释放，resume 不应重复释放
        guard.release();
        assert_eq!(extension.released.lock().len(), 1);
    }

    #[test]
    fn test_stale_expiry_leaves_newer_grant_alone() {
        let extension = Arc::new(RecordingExtension::default());
        let guard = ExtensionGuard::new(extension.clone());

        assert!(guard.on_suspend(true));
        guard.release();
        assert!(guard.on_suspend(true));

        let mut expiries: Vec<ExpiryFn> = extension.expiries.lock().drain(..).collect();
        let second = expiries.pop().unwrap();
        let first = expiries.pop().unwrap();

        first();
        assert!(guard.is_held());
        assert_eq!(*extension.released.lock(), vec![ExtensionHandle(0)]);

        second();
        assert!(!guard.is_held());
        assert_eq!(*extension.released.lock(), vec![ExtensionHandle(0), ExtensionHandle(1)]);
    }

    #[test]
    fn test_grant_expiring_during_request_is_not_held() {
        let extension = Arc::new(RecordingExtension {
            expire_immediately: true,
            ..Default::default()
        });
        let guard = ExtensionGuard::new(extension.clone());

        assert!(!guard.on_suspend(true));
        assert!(!guard.is_held());
        assert_eq!(*extension.released.lock(), vec![ExtensionHandle(0)]);
    }
}
