//! Windows 托盘图标。
//!
//! 托盘线程拥有一个隐藏的消息窗口，定时从状态信箱拉取最新文本并更新提示，
//! 右键菜单只有一个“Quit”项，选中后触发关闭信号。

use std::cell::RefCell;
use std::mem::size_of;
use std::sync::mpsc;
use std::thread;

use tokio_util::sync::CancellationToken;
use windows::{
    Win32::{
        Foundation::{
            ERROR_CLASS_ALREADY_EXISTS, GetLastError, HWND, LPARAM, LRESULT, POINT, WPARAM,
        },
        Graphics::Gdi::{CreateBitmap, DeleteObject},
        System::{LibraryLoader::GetModuleHandleW, Threading::GetCurrentThreadId},
        UI::{
            Shell::{
                NIF_ICON, NIF_MESSAGE, NIF_TIP, NIM_ADD, NIM_DELETE, NIM_MODIFY, NOTIFYICONDATAW,
                Shell_NotifyIconW,
            },
            WindowsAndMessaging::{
                AppendMenuW, CreateIconIndirect, CreatePopupMenu, CreateWindowExW,
                DefWindowProcW, DestroyIcon, DestroyMenu, DestroyWindow, DispatchMessageW,
                GetCursorPos, GetMessageW, HICON, ICONINFO, KillTimer, MF_STRING, MSG,
                PostMessageW, PostQuitMessage, PostThreadMessageW, RegisterClassW,
                SetForegroundWindow, SetTimer, TPM_BOTTOMALIGN, TPM_RIGHTALIGN, TrackPopupMenu,
                TranslateMessage, WINDOW_EX_STYLE, WM_COMMAND, WM_LBUTTONUP, WM_NULL, WM_QUIT,
                WM_RBUTTONUP, WM_TIMER, WM_USER, WNDCLASSW, WS_OVERLAPPED,
            },
        },
    },
    core::{Error as WinError, Result as WinResult, w},
};

use crate::{
    display::{ICON_SIZE, REFRESH_INTERVAL, icon_pixels, spawn_named},
    error::{Result, SenderError},
    status::StatusReporter,
};

const WM_TRAYICON: u32 = WM_USER + 1;
const TRAY_ICON_ID: u32 = 1;
const TIMER_ID_REFRESH: usize = 1;
const MENU_QUIT: u16 = 101;

struct TrayContext {
    hwnd: HWND,
    reporter: StatusReporter,
    shutdown: CancellationToken,
    seen_generation: u64,
}

thread_local! {
    static TRAY_CONTEXT: RefCell<Option<TrayContext>> = const { RefCell::new(None) };
}

/// 通过线程消息让托盘线程退出消息循环。
pub(crate) struct TrayStopper {
    thread_id: u32,
}

impl TrayStopper {
    pub(crate) fn request_stop(&self) {
        if let Err(e) = unsafe { PostThreadMessageW(self.thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) }
        {
            log::debug!("[托盘] 发送退出消息失败 (线程可能已自行退出): {e}");
        }
    }
}

/// 启动托盘线程，等待托盘图标创建完成后返回。
pub(crate) fn spawn_tray(
    reporter: StatusReporter,
    shutdown: CancellationToken,
) -> Result<(TrayStopper, thread::JoinHandle<()>)> {
    let (ready_tx, ready_rx) = mpsc::channel::<Result<u32>>();
    let handle = spawn_named("tray_thread", move || run_tray(reporter, shutdown, &ready_tx))?;

    match ready_rx.recv() {
        Ok(Ok(thread_id)) => Ok((TrayStopper { thread_id }, handle)),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => {
            let _ = handle.join();
            Err(SenderError::WorkerThread("托盘线程在初始化前退出".to_string()))
        }
    }
}

fn run_tray(
    reporter: StatusReporter,
    shutdown: CancellationToken,
    ready_tx: &mpsc::Sender<Result<u32>>,
) {
    let tray = match TrayWindow::create(reporter, shutdown) {
        Ok(tray) => tray,
        Err(e) => {
            log::error!("[托盘] 创建托盘图标失败: {e}");
            let _ = ready_tx.send(Err(e.into()));
            return;
        }
    };
    let _ = ready_tx.send(Ok(unsafe { GetCurrentThreadId() }));
    log::debug!("[托盘] 托盘线程已启动。");

    unsafe {
        let mut msg = MSG::default();
        while GetMessageW(&raw mut msg, None, 0, 0).as_bool() {
            let _ = TranslateMessage(&raw const msg);
            DispatchMessageW(&raw const msg);
        }
    }

    drop(tray);
    log::debug!("[托盘] 托盘线程已结束。");
}

/// RAII Guard，拥有隐藏窗口、托盘图标与图标句柄。
struct TrayWindow {
    hwnd: HWND,
    icon: HICON,
}

impl TrayWindow {
    fn create(reporter: StatusReporter, shutdown: CancellationToken) -> WinResult<Self> {
        let hwnd = unsafe {
            let instance = GetModuleHandleW(None)?;
            let class_name = w!("NowPlayingSenderTray");
            let wc = WNDCLASSW {
                lpfnWndProc: Some(tray_wnd_proc),
                hInstance: instance.into(),
                lpszClassName: class_name,
                ..Default::default()
            };
            if RegisterClassW(&raw const wc) == 0 {
                let last_error = GetLastError();
                if last_error != ERROR_CLASS_ALREADY_EXISTS {
                    return Err(last_error.into());
                }
            }
            CreateWindowExW(
                WINDOW_EX_STYLE::default(),
                class_name,
                w!("Now Playing Sender"),
                WS_OVERLAPPED,
                0,
                0,
                0,
                0,
                None,
                None,
                Some(instance.into()),
                None,
            )?
        };

        let icon = match unsafe { create_icon() } {
            Ok(icon) => icon,
            Err(e) => {
                unsafe {
                    let _ = DestroyWindow(hwnd);
                }
                return Err(e);
            }
        };
        let tray = Self { hwnd, icon };

        let tip = reporter.current();
        let mut nid = tray.notify_data();
        nid.uFlags = NIF_ICON | NIF_MESSAGE | NIF_TIP;
        nid.uCallbackMessage = WM_TRAYICON;
        nid.hIcon = icon;
        copy_tip(&mut nid, &tip);
        if !unsafe { Shell_NotifyIconW(NIM_ADD, &raw const nid) }.as_bool() {
            return Err(WinError::from_win32());
        }

        TRAY_CONTEXT.with(|ctx| {
            *ctx.borrow_mut() = Some(TrayContext {
                hwnd,
                reporter,
                shutdown,
                seen_generation: 0,
            });
        });

        unsafe {
            SetTimer(
                Some(hwnd),
                TIMER_ID_REFRESH,
                REFRESH_INTERVAL.as_millis() as u32,
                None,
            );
        }
        Ok(tray)
    }

    fn notify_data(&self) -> NOTIFYICONDATAW {
        NOTIFYICONDATAW {
            cbSize: size_of::<NOTIFYICONDATAW>() as u32,
            hWnd: self.hwnd,
            uID: TRAY_ICON_ID,
            ..Default::default()
        }
    }
}

impl Drop for TrayWindow {
    fn drop(&mut self) {
        TRAY_CONTEXT.with(|ctx| ctx.borrow_mut().take());
        let nid = self.notify_data();
        unsafe {
            let _ = KillTimer(Some(self.hwnd), TIMER_ID_REFRESH);
            let _ = Shell_NotifyIconW(NIM_DELETE, &raw const nid);
            if let Err(e) = DestroyIcon(self.icon) {
                log::warn!("[托盘] 销毁图标失败: {e}");
            }
            if let Err(e) = DestroyWindow(self.hwnd) {
                log::warn!("[托盘] 销毁窗口失败: {e}");
            }
        }
    }
}

/// 提示文本最多 127 个 UTF-16 单元，超出部分截断。
fn copy_tip(nid: &mut NOTIFYICONDATAW, text: &str) {
    let wide: Vec<u16> = text.encode_utf16().take(nid.szTip.len() - 1).collect();
    nid.szTip = [0; 128];
    nid.szTip[..wide.len()].copy_from_slice(&wide);
}

unsafe fn create_icon() -> WinResult<HICON> {
    let pixels = icon_pixels(ICON_SIZE);
    // 全零掩码表示所有像素都不透明
    let mask = vec![0u8; ICON_SIZE * ICON_SIZE / 8];
    let side = ICON_SIZE as i32;

    unsafe {
        let color = CreateBitmap(side, side, 1, 32, Some(pixels.as_ptr().cast()));
        let mask_bitmap = CreateBitmap(side, side, 1, 1, Some(mask.as_ptr().cast()));
        let info = ICONINFO {
            fIcon: true.into(),
            xHotspot: 0,
            yHotspot: 0,
            hbmMask: mask_bitmap,
            hbmColor: color,
        };
        let icon = CreateIconIndirect(&raw const info);
        let _ = DeleteObject(color.into());
        let _ = DeleteObject(mask_bitmap.into());
        icon
    }
}

fn refresh_tooltip() {
    TRAY_CONTEXT.with(|ctx| {
        let mut ctx = ctx.borrow_mut();
        let Some(ctx) = ctx.as_mut() else {
            return;
        };
        let Some((generation, message)) = ctx.reporter.changed_since(ctx.seen_generation) else {
            return;
        };
        ctx.seen_generation = generation;

        let mut nid = NOTIFYICONDATAW {
            cbSize: size_of::<NOTIFYICONDATAW>() as u32,
            hWnd: ctx.hwnd,
            uID: TRAY_ICON_ID,
            uFlags: NIF_TIP,
            ..Default::default()
        };
        copy_tip(&mut nid, &message);
        if !unsafe { Shell_NotifyIconW(NIM_MODIFY, &raw const nid) }.as_bool() {
            log::trace!("[托盘] 更新提示文本失败。");
        }
    });
}

fn request_quit() {
    let token = TRAY_CONTEXT.with(|ctx| ctx.borrow().as_ref().map(|c| c.shutdown.clone()));
    if let Some(token) = token {
        log::info!("[托盘] 用户选择退出。");
        token.cancel();
    }
    unsafe { PostQuitMessage(0) };
}

unsafe fn show_context_menu(hwnd: HWND) {
    unsafe {
        let Ok(menu) = CreatePopupMenu() else {
            return;
        };
        let _ = AppendMenuW(menu, MF_STRING, MENU_QUIT as usize, w!("Quit"));

        let mut pt = POINT::default();
        let _ = GetCursorPos(&raw mut pt);
        let _ = SetForegroundWindow(hwnd);
        let _ = TrackPopupMenu(
            menu,
            TPM_RIGHTALIGN | TPM_BOTTOMALIGN,
            pt.x,
            pt.y,
            0,
            hwnd,
            None,
        );
        let _ = PostMessageW(Some(hwnd), WM_NULL, WPARAM(0), LPARAM(0));
        let _ = DestroyMenu(menu);
    }
}

unsafe extern "system" fn tray_wnd_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    match msg {
        WM_TIMER if wparam.0 == TIMER_ID_REFRESH => {
            refresh_tooltip();
            LRESULT(0)
        }
        WM_TRAYICON => {
            let mouse_msg = (lparam.0 & 0xFFFF) as u32;
            if mouse_msg == WM_RBUTTONUP || mouse_msg == WM_LBUTTONUP {
                unsafe { show_context_menu(hwnd) };
            }
            LRESULT(0)
        }
        WM_COMMAND if (wparam.0 & 0xFFFF) as u16 == MENU_QUIT => {
            request_quit();
            LRESULT(0)
        }
        _ => unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) },
    }
}
